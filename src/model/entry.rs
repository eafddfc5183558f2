//! Track Entries, playlist items and snapshots.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;

use super::stage::{FailureKind, Stage};

/// Pseudo playlist id used for entries added by hand.
pub const MANUAL_PLAYLIST_ID: &str = "manual";

/// One item as returned by the playlist provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistItem {
    /// Stable provider identifier (e.g. `spotify:track:...`)
    pub item_id: String,
    pub artist: String,
    pub title: String,
    /// Album name, when the provider knows it
    pub album: Option<String>,
}

impl PlaylistItem {
    pub fn new(item_id: impl Into<String>, artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            artist: artist.into(),
            title: title.into(),
            album: None,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }
}

/// Details of why an entry is in [`Stage::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Stage the entry was in when the failure happened
    pub failed_from: Stage,
    /// `false` means terminal until an operator retries it
    pub retryable: bool,
}

/// The persisted record of one candidate track's journey.
#[derive(Debug, Clone)]
pub struct TrackEntry {
    /// Database ID
    pub id: i64,
    /// Watched playlist the item came from (or [`MANUAL_PLAYLIST_ID`])
    pub playlist_id: String,
    /// Provider item identifier
    pub source_item_id: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub stage: Stage,
    /// Present iff `stage == Failed`
    pub failure: Option<Failure>,
    /// Most recent error message; kept after a retry for inspection
    pub last_error: Option<String>,
    /// Skip reason or verification remark (e.g. `already_tracked`)
    pub note: Option<String>,
    /// Consecutive failures of the current operation
    pub retry_count: u32,
    /// Partial SHA-256 of the downloaded file
    pub content_hash: Option<String>,
    /// Downloaded (and later tagged) file
    pub file_path: Option<PathBuf>,
    /// Where the library manager filed the track after import
    pub library_path: Option<PathBuf>,
    /// MusicBrainz release-group id resolved by tagging
    pub album_id: Option<String>,
    /// MusicBrainz recording id resolved by tagging
    pub recording_id: Option<String>,
    /// Library manager command id of the last import trigger
    pub import_request_id: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub stage_changed_at: DateTime<Utc>,
    /// Queue position key; refreshed on every (re-)entry into `queued`
    pub enqueued_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Backoff floor for a retryable failure
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
    /// Start of the verification grace window
    pub import_requested_at: Option<DateTime<Utc>>,
    /// Set on reaching a terminal stage
    pub completed_at: Option<DateTime<Utc>>,
}

impl TrackEntry {
    /// Terminal means no further automated transition will happen.
    pub fn is_terminal(&self) -> bool {
        match self.stage {
            Stage::Failed => !self.failure.as_ref().is_some_and(|f| f.retryable),
            stage => stage.is_terminal(),
        }
    }

    /// Whether a retryable failure has waited out its backoff floor.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.stage == Stage::Failed
            && self.failure.as_ref().is_some_and(|f| f.retryable)
            && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Stage this entry returns to when retried.
    pub fn retry_target(&self) -> Stage {
        match (&self.stage, &self.failure) {
            (Stage::Failed, Some(failure)) => failure.failed_from.retry_target(),
            (stage, _) => *stage,
        }
    }

    /// Stage label including failure details, e.g. `failed(no_match, final)`.
    pub fn stage_label(&self) -> String {
        match &self.failure {
            Some(f) if self.stage == Stage::Failed => format!(
                "failed({}, {})",
                f.kind,
                if f.retryable { "retrying" } else { "final" }
            ),
            _ => self.stage.to_string(),
        }
    }

    /// `Artist - Title` for log lines and listings.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Last-seen membership of one watched playlist.
#[derive(Debug, Clone, Default)]
pub struct PlaylistSnapshot {
    pub playlist_id: String,
    pub name: Option<String>,
    /// Item ids in provider order
    pub items: Vec<String>,
    pub polled_at: Option<DateTime<Utc>>,
}

impl PlaylistSnapshot {
    /// Item ids as a set for diffing.
    pub fn item_set(&self) -> HashSet<&str> {
        self.items.iter().map(String::as_str).collect()
    }

    /// Items present in `current` but not in this snapshot, in `current` order.
    ///
    /// Duplicate ids within `current` are reported once.
    pub fn added<'a>(&self, current: &'a [PlaylistItem]) -> Vec<&'a PlaylistItem> {
        let known = self.item_set();
        let mut seen = HashSet::new();
        current
            .iter()
            .filter(|item| !known.contains(item.item_id.as_str()))
            .filter(|item| seen.insert(item.item_id.as_str()))
            .collect()
    }

    /// Ids present in this snapshot but missing from `current`.
    pub fn removed(&self, current: &[PlaylistItem]) -> Vec<String> {
        let now: HashSet<&str> = current.iter().map(|i| i.item_id.as_str()).collect();
        self.items
            .iter()
            .filter(|id| !now.contains(id.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_entry;

    #[test]
    fn test_snapshot_diff() {
        let snapshot = PlaylistSnapshot {
            playlist_id: "pl".into(),
            items: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let current = vec![
            PlaylistItem::new("b", "Artist", "B"),
            PlaylistItem::new("c", "Artist", "C"),
            PlaylistItem::new("c", "Artist", "C again"),
        ];

        let added = snapshot.added(&current);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].item_id, "c");
        assert_eq!(snapshot.removed(&current), vec!["a".to_string()]);
    }

    #[test]
    fn test_empty_snapshot_reports_everything() {
        let snapshot = PlaylistSnapshot::default();
        let current = vec![PlaylistItem::new("x", "A", "T")];
        assert_eq!(snapshot.added(&current).len(), 1);
        assert!(snapshot.removed(&current).is_empty());
    }

    #[test]
    fn test_failed_entry_terminality() {
        let mut entry = mock_entry(Stage::Failed);
        entry.failure = Some(Failure {
            kind: FailureKind::AcquisitionTransient,
            failed_from: Stage::Downloading,
            retryable: true,
        });
        assert!(!entry.is_terminal());
        assert_eq!(entry.retry_target(), Stage::Queued);
        assert_eq!(entry.stage_label(), "failed(acquisition_transient, retrying)");

        entry.failure = Some(Failure {
            kind: FailureKind::NoMatch,
            failed_from: Stage::Identifying,
            retryable: false,
        });
        assert!(entry.is_terminal());
        assert_eq!(entry.stage_label(), "failed(no_match, final)");
    }

    #[test]
    fn test_is_due_respects_backoff_floor() {
        let now = Utc::now();
        let mut entry = mock_entry(Stage::Failed);
        entry.failure = Some(Failure {
            kind: FailureKind::AcquisitionTransient,
            failed_from: Stage::Downloading,
            retryable: true,
        });
        entry.next_attempt_at = Some(now + chrono::Duration::seconds(60));
        assert!(!entry.is_due(now));
        assert!(entry.is_due(now + chrono::Duration::seconds(60)));

        entry.failure.as_mut().unwrap().retryable = false;
        assert!(!entry.is_due(now + chrono::Duration::seconds(3600)));
    }
}

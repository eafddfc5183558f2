//! Verification Sweep.
//!
//! Import and media server indexing happen in the background, outside our
//! control, so this is the one component that uses elapsed time as a signal:
//! an import that does not show up within the grace window is re-triggered.

use futures::stream::{self, StreamExt};
use std::path::PathBuf;

use crate::db::entries::{self, Advance};
use crate::error::Result;
use crate::model::{FailureKind, Stage, TrackEntry};
use crate::providers::AlbumRef;

use super::{Engine, within};

/// Note stored when the library manager already held the album.
const ALREADY_IMPORTED: &str = "already_imported";

/// What one verification decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The media server shows the file
    Verified,
    /// Still waiting (possibly advanced to `imported`)
    Pending,
    /// Grace window expired; import will be re-triggered
    TimedOut,
    /// Collaborator unreachable or entry moved on; nothing changed
    Skipped,
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub verified: usize,
    pub pending: usize,
    pub timed_out: usize,
}

impl Engine {
    /// Check one `import_requested` or `imported` entry.
    ///
    /// Once the library manager has the album, the imported file's library
    /// path is recorded and is what the media server is asked about.
    pub async fn verify(&self, entry: &TrackEntry) -> Result<Verdict> {
        if !matches!(entry.stage, Stage::ImportRequested | Stage::Imported) {
            return Ok(Verdict::Skipped);
        }
        if entry.file_path.is_none() && entry.library_path.is_none() {
            return Ok(Verdict::Skipped);
        }
        let limit = self.settings.external_call_timeout;

        let album = AlbumRef::for_entry(entry);
        let in_library = match within(limit, self.collaborators.library.has_album(&album)).await {
            Ok(found) => Some(found),
            Err(e) => {
                tracing::warn!(target: "verify", entry_id = entry.id, error = %e, "Library manager unavailable");
                None
            }
        };

        let mut current = entry.clone();
        let mut resolved = None;
        if in_library == Some(true) && current.library_path.is_none() {
            resolved = self.resolve_library_path(&current, &album).await;
        }

        if in_library == Some(true) && current.stage == Stage::ImportRequested {
            let values = Advance {
                library_path: resolved.clone(),
                ..Default::default()
            };
            if !self
                .transition(&current, Stage::ImportRequested, Stage::Imported, &values)
                .await?
            {
                return Ok(Verdict::Skipped);
            }
            current.stage = Stage::Imported;
        } else if let Some(path) = &resolved {
            if !entries::set_library_path(&self.pool, current.id, current.stage, path).await? {
                return Ok(Verdict::Skipped);
            }
        }
        if resolved.is_some() {
            current.library_path = resolved;
        }

        let Some(path) = current.library_path.as_deref().or(current.file_path.as_deref()) else {
            return Ok(Verdict::Skipped);
        };
        let indexed = match within(limit, self.collaborators.media.path_indexed(path)).await {
            Ok(indexed) => indexed,
            Err(e) => {
                tracing::warn!(target: "verify", entry_id = entry.id, error = %e, "Media server unavailable");
                return Ok(Verdict::Skipped);
            }
        };
        if indexed {
            return self.mark_verified(&current, None).await;
        }

        if self.within_grace(entry) {
            return Ok(Verdict::Pending);
        }

        match in_library {
            // The album reached the library, possibly through another path
            // than our scan; the media server is simply lagging.
            Some(true) => self.mark_verified(&current, Some(ALREADY_IMPORTED)).await,
            Some(false) => {
                let applied = self
                    .record_failure(
                        &current,
                        current.stage,
                        FailureKind::VerificationTimeout,
                        format!("{} not visible after grace window", path.display()),
                        self.settings.max_import_attempts,
                    )
                    .await?;
                Ok(if applied {
                    Verdict::TimedOut
                } else {
                    Verdict::Skipped
                })
            }
            None => Ok(Verdict::Skipped),
        }
    }

    /// Ask the library manager where it filed the entry's recording.
    async fn resolve_library_path(&self, entry: &TrackEntry, album: &AlbumRef) -> Option<PathBuf> {
        let recording_id = entry.recording_id.as_deref()?;
        let limit = self.settings.external_call_timeout;
        match within(limit, self.collaborators.library.imported_path(album, recording_id)).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(target: "verify", entry_id = entry.id, error = %e, "Library path lookup failed");
                None
            }
        }
    }

    fn within_grace(&self, entry: &TrackEntry) -> bool {
        let Some(requested_at) = entry.import_requested_at else {
            return false;
        };
        let grace = chrono::Duration::from_std(self.settings.verification_grace)
            .unwrap_or(chrono::Duration::MAX);
        requested_at
            .checked_add_signed(grace)
            .is_none_or(|deadline| self.clock.now() < deadline)
    }

    async fn mark_verified(&self, entry: &TrackEntry, note: Option<&str>) -> Result<Verdict> {
        let values = Advance {
            note: note.map(str::to_string),
            ..Default::default()
        };
        let applied = self
            .transition(entry, entry.stage, Stage::Verified, &values)
            .await?;
        Ok(if applied {
            Verdict::Verified
        } else {
            Verdict::Skipped
        })
    }

    /// Verify every entry awaiting confirmation, a few at a time.
    pub async fn verify_pass(&self) -> Result<SweepReport> {
        let mut pending = entries::entries_in_stage(&self.pool, Stage::ImportRequested).await?;
        pending.extend(entries::entries_in_stage(&self.pool, Stage::Imported).await?);

        let verdicts: Vec<Result<Verdict>> = stream::iter(pending)
            .map(|entry| async move { self.verify(&entry).await })
            .buffer_unordered(self.settings.verification_concurrency)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for verdict in verdicts {
            match verdict? {
                Verdict::Verified => report.verified += 1,
                Verdict::Pending => report.pending += 1,
                Verdict::TimedOut => report.timed_out += 1,
                Verdict::Skipped => {}
            }
        }
        if report != SweepReport::default() {
            tracing::info!(
                target: "verify",
                verified = report.verified,
                pending = report.pending,
                timed_out = report.timed_out,
                "Verification sweep done"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::harness;
    use crate::test_utils::entry_in_stage;
    use std::time::Duration;

    #[tokio::test]
    async fn test_indexed_file_is_verified() {
        let h = harness().await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::ImportRequested, &*h.clock).await;
        h.media.indexed.lock().insert(entry.file_path.clone().unwrap());

        let report = h.engine.verify_pass().await.unwrap();
        assert_eq!(report.verified, 1);

        let verified = h.entry(entry.id).await;
        assert_eq!(verified.stage, Stage::Verified);
        assert!(verified.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_waits_within_grace_window() {
        let h = harness().await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::ImportRequested, &*h.clock).await;

        h.clock.advance(Duration::from_secs(60));
        assert_eq!(h.engine.verify(&entry).await.unwrap(), Verdict::Pending);
        assert_eq!(h.entry(entry.id).await.stage, Stage::ImportRequested);
    }

    #[tokio::test]
    async fn test_grace_expiry_retriggers_import() {
        let h = harness().await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::ImportRequested, &*h.clock).await;

        h.clock.advance(h.engine.settings().verification_grace);
        assert_eq!(h.engine.verify(&entry).await.unwrap(), Verdict::TimedOut);

        let failed = h.entry(entry.id).await;
        assert_eq!(
            failed.failure.as_ref().map(|f| (f.kind, f.retryable)),
            Some((FailureKind::VerificationTimeout, true))
        );

        h.clock.advance(h.engine.settings().backoff.max);
        h.engine.resume_due().await.unwrap();
        assert_eq!(h.entry(entry.id).await.stage, Stage::Tagged);
        assert_eq!(h.engine.import_pass().await.unwrap(), 1);
        assert_eq!(h.library.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_library_confirmation_advances_to_imported() {
        let h = harness().await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::ImportRequested, &*h.clock).await;
        h.library.catalog.lock().insert("A1".into());

        assert_eq!(h.engine.verify(&entry).await.unwrap(), Verdict::Pending);
        assert_eq!(h.entry(entry.id).await.stage, Stage::Imported);
    }

    #[tokio::test]
    async fn test_already_imported_counts_as_success() {
        let h = harness().await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::ImportRequested, &*h.clock).await;
        h.library.catalog.lock().insert("A1".into());

        h.clock.advance(h.engine.settings().verification_grace);
        assert_eq!(h.engine.verify(&entry).await.unwrap(), Verdict::Verified);

        let verified = h.entry(entry.id).await;
        assert_eq!(verified.stage, Stage::Verified);
        assert_eq!(verified.note.as_deref(), Some(ALREADY_IMPORTED));
    }

    #[tokio::test]
    async fn test_imported_file_is_checked_at_its_library_path() {
        let h = harness().await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::ImportRequested, &*h.clock).await;
        let library = PathBuf::from("/music/Test Artist/Test Album/01 - Track a.m4a");
        h.library.catalog.lock().insert("A1".into());
        h.library.files.lock().insert("rec-a".into(), library.clone());

        // The staging file is gone after import; only the library copy is indexed
        h.media.indexed.lock().insert(library.clone());
        assert_eq!(h.engine.verify(&entry).await.unwrap(), Verdict::Verified);

        let verified = h.entry(entry.id).await;
        assert_eq!(verified.stage, Stage::Verified);
        assert_eq!(verified.library_path, Some(library.clone()));
        assert_eq!(verified.note, None);
    }

    #[tokio::test]
    async fn test_library_path_is_kept_while_indexing_lags() {
        let h = harness().await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::Imported, &*h.clock).await;
        let library = PathBuf::from("/music/Test Artist/Test Album/01 - Track a.m4a");
        h.library.catalog.lock().insert("A1".into());
        h.library.files.lock().insert("rec-a".into(), library.clone());

        assert_eq!(h.engine.verify(&entry).await.unwrap(), Verdict::Pending);
        let imported = h.entry(entry.id).await;
        assert_eq!(imported.stage, Stage::Imported);
        assert_eq!(imported.library_path, Some(library.clone()));

        h.media.indexed.lock().insert(library);
        assert_eq!(h.engine.verify(&imported).await.unwrap(), Verdict::Verified);
    }

    #[tokio::test]
    async fn test_unreachable_media_server_changes_nothing() {
        let h = harness().await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::ImportRequested, &*h.clock).await;
        *h.media.unreachable.lock() = true;

        h.clock.advance(h.engine.settings().verification_grace * 2);
        assert_eq!(h.engine.verify(&entry).await.unwrap(), Verdict::Skipped);
        assert_eq!(h.entry(entry.id).await.stage, Stage::ImportRequested);
    }
}

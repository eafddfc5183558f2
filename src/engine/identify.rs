//! Identification & Tagging Adapter.
//!
//! A clean "no match" is final: the tool will give the same answer again.
//! Timeouts and abnormal exits are retried up to `tagger.max_attempts`.

use crate::db::entries::{self, Advance};
use crate::error::Result;
use crate::model::{FailureKind, Stage, TrackEntry};
use crate::providers::{TagError, TagVerdict};

use super::Engine;

impl Engine {
    /// Identify and tag one downloaded entry.
    ///
    /// Returns `false` if the entry was not (or no longer) `downloaded`.
    pub async fn identify_entry(&self, entry: &TrackEntry) -> Result<bool> {
        let Some(entry) = entries::claim(
            &self.pool,
            entry.id,
            Stage::Downloaded,
            Stage::Identifying,
            self.clock.now(),
        )
        .await?
        else {
            return Ok(false);
        };
        tracing::info!(target: "identify", entry_id = entry.id, from = %Stage::Downloaded, to = %Stage::Identifying, "{}", entry.display_name());

        let cap = self.settings.max_identify_attempts;
        let Some(path) = entry.file_path.clone() else {
            self.record_failure(
                &entry,
                Stage::Identifying,
                FailureKind::IdentificationError,
                "no downloaded file recorded".into(),
                0,
            )
            .await?;
            return Ok(true);
        };

        let limit = self.settings.identify_timeout;
        let verdict = tokio::time::timeout(limit, self.collaborators.tagger.run(&path, limit))
            .await
            .unwrap_or(Err(TagError::Timeout(limit)));

        match verdict {
            Ok(TagVerdict::Matched { album_id, track_id }) => {
                tracing::debug!(target: "identify", entry_id = entry.id, album_id = %album_id, track_id = %track_id, "Identified");
                let values = Advance {
                    album_id: Some(album_id),
                    recording_id: Some(track_id),
                    ..Default::default()
                };
                self.transition(&entry, Stage::Identifying, Stage::Tagged, &values)
                    .await?;
            }
            Ok(TagVerdict::NoMatch) => {
                self.record_failure(
                    &entry,
                    Stage::Identifying,
                    FailureKind::NoMatch,
                    format!("no confident match for {}", path.display()),
                    cap,
                )
                .await?;
            }
            Err(e) => {
                let kind = match e {
                    TagError::Timeout(_) => FailureKind::IdentificationTimeout,
                    TagError::Exit { .. } | TagError::Failed(_) => FailureKind::IdentificationError,
                };
                self.record_failure(&entry, Stage::Identifying, kind, e.to_string(), cap)
                    .await?;
            }
        }
        Ok(true)
    }

    /// Identify every entry waiting in `downloaded`. Returns how many ran.
    pub async fn identify_pass(&self) -> Result<usize> {
        let mut ran = 0;
        for entry in entries::entries_in_stage(&self.pool, Stage::Downloaded).await? {
            if self.identify_entry(&entry).await? {
                ran += 1;
            }
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{harness, harness_with};
    use crate::test_utils::entry_in_stage;

    #[tokio::test]
    async fn test_match_records_identifiers() {
        let h = harness().await;
        h.tagger.script.lock().push_back(Ok(TagVerdict::Matched {
            album_id: "rg-1".into(),
            track_id: "rec-9".into(),
        }));
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::Downloaded, &*h.clock).await;

        assert_eq!(h.engine.identify_pass().await.unwrap(), 1);

        let tagged = h.entry(entry.id).await;
        assert_eq!(tagged.stage, Stage::Tagged);
        assert_eq!(tagged.album_id.as_deref(), Some("rg-1"));
        assert_eq!(tagged.recording_id.as_deref(), Some("rec-9"));
        assert_eq!(h.tagger.calls.lock().clone(), vec![entry.file_path.unwrap()]);
    }

    #[tokio::test]
    async fn test_no_match_is_final() {
        let h = harness().await;
        h.tagger.script.lock().push_back(Ok(TagVerdict::NoMatch));
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::Downloaded, &*h.clock).await;

        h.engine.identify_pass().await.unwrap();

        let failed = h.entry(entry.id).await;
        assert_eq!(failed.stage_label(), "failed(no_match, final)");
        assert!(failed.is_terminal());
    }

    #[tokio::test]
    async fn test_tool_errors_retry_up_to_cap() {
        let h = harness_with(|s| s.max_identify_attempts = 2).await;
        h.tagger.script.lock().extend([
            Err(TagError::Exit {
                code: Some(3),
                message: "decoder crashed".into(),
            }),
            Err(TagError::Timeout(std::time::Duration::from_secs(120))),
        ]);
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::Downloaded, &*h.clock).await;

        h.engine.identify_pass().await.unwrap();
        let first = h.entry(entry.id).await;
        let failure = first.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::IdentificationError);
        assert!(failure.retryable);
        assert_eq!(first.retry_target(), Stage::Downloaded);

        h.clock.advance(h.engine.settings().backoff.max);
        assert_eq!(h.engine.resume_due().await.unwrap(), 1);
        assert_eq!(h.entry(entry.id).await.stage, Stage::Downloaded);

        h.engine.identify_pass().await.unwrap();
        let second = h.entry(entry.id).await;
        let failure = second.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::IdentificationTimeout);
        assert!(!failure.retryable);
        assert_eq!(second.retry_count, 2);
    }

    #[tokio::test]
    async fn test_stuck_tool_times_out() {
        struct Hanging;

        #[async_trait::async_trait]
        impl crate::providers::TagTool for Hanging {
            async fn run(
                &self,
                _path: &std::path::Path,
                _timeout: std::time::Duration,
            ) -> std::result::Result<TagVerdict, TagError> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(TagVerdict::NoMatch)
            }
        }

        let h = harness_with(|s| s.identify_timeout = std::time::Duration::from_millis(20)).await;
        let entry = entry_in_stage(h.engine.pool(), "a", Stage::Downloaded, &*h.clock).await;

        let engine = Engine::new(
            h.engine.pool().clone(),
            h.clock.clone(),
            crate::engine::Collaborators {
                tagger: std::sync::Arc::new(Hanging),
                ..h.engine.collaborators.clone()
            },
            h.engine.settings().clone(),
        );
        engine.identify_pass().await.unwrap();

        let failed = h.entry(entry.id).await;
        assert_eq!(
            failed.failure.map(|f| f.kind),
            Some(FailureKind::IdentificationTimeout)
        );
    }
}

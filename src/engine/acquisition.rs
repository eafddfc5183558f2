//! Acquisition Queue: download workers.
//!
//! The queue itself is the set of `queued` entries ordered by
//! `enqueued_at`; claiming is a single atomic update, so any number of
//! workers can pull from it. Retryable failures re-enter at the back once
//! their backoff floor has passed (see [`Engine::resume_due`]).

use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;

use crate::clock;
use crate::db::entries::{self, Advance};
use crate::error::Result;
use crate::hash;
use crate::model::{FailureKind, Stage, TrackEntry};
use crate::providers::{FetchError, FetchRequest};

use super::Engine;

impl Engine {
    /// Put a prechecked entry at the back of the download queue.
    pub async fn enqueue(&self, entry: &TrackEntry) -> Result<bool> {
        self.transition(entry, Stage::Discovered, Stage::Queued, &Advance::default())
            .await
    }

    /// Claim the oldest queued entry, unless today's quota is used up.
    pub async fn dequeue(&self) -> Result<Option<TrackEntry>> {
        let now = self.clock.now();
        let limit = self.settings.daily_limit;
        if limit > 0 {
            let today = entries::downloads_since(&self.pool, clock::start_of_day(now)).await?;
            if today >= limit {
                tracing::debug!(target: "acquisition", today, limit, "Daily download limit reached");
                return Ok(None);
            }
        }

        let claimed = entries::claim_next_queued(&self.pool, now).await?;
        if let Some(entry) = &claimed {
            tracing::info!(target: "acquisition", entry_id = entry.id, from = %Stage::Queued, to = %Stage::Downloading, "{}", entry.display_name());
        }
        Ok(claimed)
    }

    /// One download attempt for a claimed entry.
    ///
    /// On success the file is hashed, the entry moves to `downloaded` and
    /// identification starts right away.
    pub async fn download(&self, entry: TrackEntry) -> Result<()> {
        let request = FetchRequest::for_entry(&entry, &self.settings.download_dir);
        let limit = self.settings.download_timeout;
        let fetched = tokio::time::timeout(limit, self.collaborators.downloader.fetch(&request))
            .await
            .unwrap_or_else(|_| Err(FetchError::Transient(format!("timed out after {limit:?}"))));

        let (kind, message) = match fetched {
            Ok(path) => match hash::content_hash_async(&path).await {
                Ok(content_hash) => {
                    let values = Advance {
                        file_path: Some(path),
                        content_hash: Some(content_hash),
                        ..Default::default()
                    };
                    if self
                        .transition(&entry, Stage::Downloading, Stage::Downloaded, &values)
                        .await?
                    {
                        if let Some(downloaded) = entries::get_entry(&self.pool, entry.id).await? {
                            self.identify_entry(&downloaded).await?;
                        }
                    }
                    return Ok(());
                }
                Err(e) => (
                    FailureKind::AcquisitionTransient,
                    format!("downloaded file unreadable ({}): {e}", path.display()),
                ),
            },
            Err(FetchError::NotFound(message)) => (FailureKind::AcquisitionPermanent, message),
            Err(FetchError::Transient(message)) => (FailureKind::AcquisitionTransient, message),
        };

        self.record_failure(
            &entry,
            Stage::Downloading,
            kind,
            message,
            self.settings.max_download_attempts,
        )
        .await?;
        Ok(())
    }

    /// Work the queue until nothing is eligible, with the configured number
    /// of concurrent workers. Returns the number of attempts made.
    pub async fn drain_queue(&self) -> Result<usize> {
        let slots = (0..self.settings.download_concurrency).map(|_| self.drain_slot());
        let attempts = futures::future::try_join_all(slots).await?;
        Ok(attempts.into_iter().sum())
    }

    async fn drain_slot(&self) -> Result<usize> {
        let mut attempts = 0;
        while let Some(entry) = self.dequeue().await? {
            // Pause between attempts only, never after the last one
            if attempts > 0 {
                tokio::time::sleep(self.politeness_delay()).await;
            }
            self.download(entry).await?;
            attempts += 1;
        }
        Ok(attempts)
    }

    /// Long-running worker for `watch` mode.
    ///
    /// Blocks only its own slot; returns when `shutdown` flips or on a
    /// fatal State Store failure. Lock contention is retried after `idle`.
    pub async fn run_worker(
        &self,
        slot: usize,
        idle: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::debug!(target: "acquisition", slot, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let step = match self.dequeue().await {
                Ok(Some(entry)) => self.download(entry).await.map(|()| self.politeness_delay()),
                Ok(None) => Ok(idle),
                Err(e) => Err(e),
            };
            let pause = match step {
                Ok(pause) => pause,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(target: "acquisition", slot, error = %e, "Worker step failed");
                    idle
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!(target: "acquisition", slot, "Worker stopped");
        Ok(())
    }

    fn politeness_delay(&self) -> Duration {
        let (min, max) = (self.settings.delay_min, self.settings.delay_max);
        if max <= min {
            return min;
        }
        rand::rng().random_range(min..=max)
    }
}

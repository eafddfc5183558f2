//! The track lifecycle orchestration engine.
//!
//! The engine owns no in-memory work state: every component reads entries
//! in the stage its operation starts from and writes the result back with an
//! optimistic `WHERE stage = ?` transition. A crash therefore loses nothing
//! but in-flight calls, which [`Engine::recover`] re-queues on start.
//!
//! Components (each an `impl Engine` block in its own module):
//! - [`watcher`] - polls watched playlists and records discoveries
//! - [`reconciler`] - duplicate precheck and import triggers
//! - [`acquisition`] - the download queue and its worker pool
//! - [`identify`] - fingerprint/tag adapter
//! - [`verification`] - media server visibility sweep
//! - [`playlists`] - derived M3U and media server playlists
//! - [`scheduler`] - named periodic passes driving all of the above

pub mod acquisition;
pub mod backoff;
pub mod identify;
pub mod playlists;
pub mod reconciler;
pub mod scheduler;
pub mod verification;
pub mod watcher;

pub use backoff::Backoff;
pub use reconciler::{Precheck, SkipReason};
pub use scheduler::{Pass, PassGuard, Scheduler};
pub use watcher::PollError;

use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{Config, WatchedPlaylist};
use crate::db::entries::{self, FailureUpdate};
use crate::error::Result;
use crate::model::{FailureKind, Stage, TrackEntry};
use crate::providers::{
    Downloader, LibraryManager, MediaServer, PlaylistProvider, ProviderError, TagTool,
};

/// The external systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn PlaylistProvider>,
    pub downloader: Arc<dyn Downloader>,
    pub tagger: Arc<dyn TagTool>,
    pub library: Arc<dyn LibraryManager>,
    pub media: Arc<dyn MediaServer>,
}

/// Tunables, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub playlists: Vec<WatchedPlaylist>,
    /// Root of the per-entry download folders
    pub download_dir: PathBuf,
    /// Where derived M3U playlists go
    pub playlist_dir: PathBuf,
    pub download_concurrency: usize,
    pub max_download_attempts: u32,
    /// Downloads per UTC day; 0 means unlimited
    pub daily_limit: u32,
    /// Politeness delay between downloads of one worker
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub max_identify_attempts: u32,
    pub max_import_attempts: u32,
    pub backoff: Backoff,
    pub external_call_timeout: Duration,
    pub download_timeout: Duration,
    pub identify_timeout: Duration,
    /// How long an import may take to show up before it is re-triggered
    pub verification_grace: Duration,
    pub verification_concurrency: usize,
    pub m3u_playlists: bool,
    pub media_server_playlists: bool,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            playlists: config.source.playlists.clone(),
            download_dir: config.paths.download_dir.clone(),
            playlist_dir: config.paths.playlist_dir.clone(),
            download_concurrency: config.downloader.concurrency.max(1),
            max_download_attempts: config.downloader.max_attempts,
            daily_limit: config.downloader.daily_limit,
            delay_min: Duration::from_secs_f64(config.downloader.delay_min_secs.max(0.0)),
            delay_max: Duration::from_secs_f64(config.downloader.delay_max_secs.max(0.0)),
            max_identify_attempts: config.tagger.max_attempts,
            max_import_attempts: config.retry.max_import_attempts,
            backoff: Backoff::from_config(&config.retry),
            external_call_timeout: config.timeouts.external_call(),
            download_timeout: config.timeouts.download(),
            identify_timeout: config.timeouts.identify(),
            verification_grace: Duration::from_secs(config.verification.grace_secs),
            verification_concurrency: config.verification.concurrency.max(1),
            m3u_playlists: config.features.m3u_playlists,
            media_server_playlists: config.features.media_server_playlists,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The orchestration engine. Share it behind an `Arc`.
pub struct Engine {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    settings: EngineSettings,
    /// Entries whose import trigger is currently in flight
    imports_in_flight: Mutex<HashSet<i64>>,
    guards: scheduler::PassGuards,
}

impl Engine {
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            clock,
            collaborators,
            settings,
            imports_in_flight: Mutex::new(HashSet::new()),
            guards: scheduler::PassGuards::default(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Reset entries a previous process left in flight.
    pub async fn recover(&self) -> Result<u64> {
        let recovered = entries::recover_interrupted(&self.pool, self.clock.now()).await?;
        if recovered > 0 {
            tracing::info!(target: "scheduler", recovered, "Recovered interrupted entries");
        }
        Ok(recovered)
    }

    /// Resume every retryable failure whose backoff floor has passed.
    ///
    /// Returns how many entries went back to work.
    pub async fn resume_due(&self) -> Result<usize> {
        let resumed = entries::resume_due(&self.pool, self.clock.now()).await?;
        for (entry, target) in &resumed {
            tracing::info!(
                target: "engine",
                entry_id = entry.id,
                from = %Stage::Failed,
                to = %target,
                retry_count = entry.retry_count,
                "{}",
                entry.display_name()
            );
        }
        Ok(resumed.len())
    }

    /// Record a classified failure of the operation `entry` was in.
    ///
    /// The failure is retryable only if its kind is and fewer than `cap`
    /// consecutive attempts have failed. Returns `false` if the entry moved
    /// on in the meantime (cancelled, removed).
    async fn record_failure(
        &self,
        entry: &TrackEntry,
        from: Stage,
        kind: FailureKind,
        message: String,
        cap: u32,
    ) -> Result<bool> {
        let now = self.clock.now();
        let retry_count = entry.retry_count + 1;
        let retryable = kind.is_retryable() && retry_count < cap;
        let update = FailureUpdate {
            kind,
            retryable,
            message,
            retry_count,
            next_attempt_at: retryable.then(|| self.settings.backoff.next_attempt_at(now, retry_count)),
        };

        let applied = entries::fail(&self.pool, entry.id, from, &update, now).await?;
        if applied {
            tracing::warn!(
                target: "engine",
                entry_id = entry.id,
                stage = %from,
                kind = %kind,
                retryable,
                retry_count,
                error = %update.message,
                "{} failed",
                entry.display_name()
            );
        } else {
            discarded(entry.id, from, Stage::Failed);
        }
        Ok(applied)
    }

    /// Forward transition with logging; `false` means the result was stale.
    async fn transition(
        &self,
        entry: &TrackEntry,
        from: Stage,
        to: Stage,
        values: &entries::Advance,
    ) -> Result<bool> {
        let applied =
            entries::advance_with(&self.pool, entry.id, from, to, values, self.clock.now()).await?;
        if applied {
            tracing::info!(target: "engine", entry_id = entry.id, from = %from, to = %to, "{}", entry.display_name());
        } else {
            discarded(entry.id, from, to);
        }
        Ok(applied)
    }
}

/// Log a transition that lost the optimistic check.
fn discarded(entry_id: i64, from: Stage, to: Stage) {
    tracing::debug!(target: "engine", entry_id, from = %from, to = %to, "Stale transition discarded");
}

/// Run a collaborator call under a deadline; expiry is a network failure.
async fn within<T>(
    limit: Duration,
    call: impl Future<Output = std::result::Result<T, ProviderError>>,
) -> std::result::Result<T, ProviderError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(ProviderError::Network(format!("timed out after {limit:?}"))))
}

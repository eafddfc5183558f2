//! The periodic scheduler.
//!
//! Each named [`Pass`] runs on its own interval; the acquisition queue runs
//! a fixed pool of workers beside them. A pass whose previous run has not
//! finished is skipped, never doubled up. Only a State Store failure stops
//! the scheduler.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};

use super::Engine;

/// A discrete, idempotent unit of scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Source Watcher poll of every playlist
    Poll,
    /// Duplicate precheck of discovered entries
    Precheck,
    /// Return due retryable failures to work
    Resume,
    /// Drain the download queue (only used by `sync`; `watch` runs workers)
    Acquire,
    /// Identify downloaded entries left over from restarts and retries
    Identify,
    /// Trigger imports for tagged entries
    Import,
    /// Verification sweep
    Verify,
    /// Derived playlists
    Playlists,
}

impl Pass {
    /// Every pass, in lifecycle order.
    pub const ALL: [Pass; 8] = [
        Pass::Poll,
        Pass::Precheck,
        Pass::Resume,
        Pass::Acquire,
        Pass::Identify,
        Pass::Import,
        Pass::Verify,
        Pass::Playlists,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Pass::Poll => "poll",
            Pass::Precheck => "precheck",
            Pass::Resume => "resume",
            Pass::Acquire => "acquire",
            Pass::Identify => "identify",
            Pass::Import => "import",
            Pass::Verify => "verify",
            Pass::Playlists => "playlists",
        }
    }

    /// Interval in `watch` mode; `None` for passes driven by workers.
    pub fn interval(&self, config: &SchedulerConfig) -> Option<Duration> {
        let secs = match self {
            Pass::Poll => config.poll_secs,
            Pass::Precheck => config.precheck_secs,
            Pass::Resume => config.resume_secs,
            Pass::Acquire => return None,
            Pass::Identify => config.identify_secs,
            Pass::Import => config.import_secs,
            Pass::Verify => config.verify_secs,
            Pass::Playlists => config.playlists_secs,
        };
        Some(Duration::from_secs(secs.max(1)))
    }
}

/// Admits one run of a pass at a time.
#[derive(Debug, Default)]
pub struct PassGuard {
    running: AtomicBool,
}

impl PassGuard {
    /// Enter unless a run is in progress; the run ends when the ticket drops.
    pub fn try_enter(&self) -> Option<PassTicket<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassTicket { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof of a running pass.
pub struct PassTicket<'a> {
    guard: &'a PassGuard,
}

impl Drop for PassTicket<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// One guard per [`Pass`].
#[derive(Debug, Default)]
pub(crate) struct PassGuards([PassGuard; 8]);

impl PassGuards {
    fn get(&self, pass: Pass) -> &PassGuard {
        &self.0[pass as usize]
    }
}

impl Engine {
    /// Run one pass. Returns `None` if its previous run is still going.
    pub async fn run_pass(&self, pass: Pass) -> Result<Option<usize>> {
        let Some(_ticket) = self.guards.get(pass).try_enter() else {
            tracing::debug!(target: "scheduler", pass = pass.name(), "Previous run still in progress; skipped");
            return Ok(None);
        };

        let count = match pass {
            Pass::Poll => self.poll_all().await?,
            Pass::Precheck => self.precheck_pass().await?,
            Pass::Resume => self.resume_due().await?,
            Pass::Acquire => self.drain_queue().await?,
            Pass::Identify => self.identify_pass().await?,
            Pass::Import => self.import_pass().await?,
            Pass::Verify => self.verify_pass().await?.verified,
            Pass::Playlists => self.sync_playlists().await?,
        };
        tracing::debug!(target: "scheduler", pass = pass.name(), count, "Pass finished");
        Ok(Some(count))
    }

    /// Recover, then run every pass once in lifecycle order.
    pub async fn run_once(&self) -> Result<()> {
        self.recover().await?;
        for pass in Pass::ALL {
            self.run_pass(pass).await?;
        }
        Ok(())
    }
}

/// Drives the engine until shutdown or a fatal State Store error.
pub struct Scheduler {
    engine: Arc<Engine>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Run until `shutdown` resolves.
    ///
    /// Returns the fatal error if the State Store failed.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.engine.recover().await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<Error>(1);
        let mut tasks = JoinSet::new();

        let idle = Duration::from_secs(self.config.worker_idle_secs.max(1));
        for slot in 0..self.engine.settings.download_concurrency {
            let engine = Arc::clone(&self.engine);
            let stop = stop_rx.clone();
            let fatal = fatal_tx.clone();
            tasks.spawn(async move {
                if let Err(e) = engine.run_worker(slot, idle, stop).await {
                    let _ = fatal.send(e).await;
                }
            });
        }

        for pass in Pass::ALL {
            let Some(period) = pass.interval(&self.config) else {
                continue;
            };
            tasks.spawn(pass_loop(
                Arc::clone(&self.engine),
                pass,
                period,
                stop_rx.clone(),
                fatal_tx.clone(),
            ));
        }
        drop(fatal_tx);

        tracing::info!(
            target: "scheduler",
            workers = self.engine.settings.download_concurrency,
            playlists = self.engine.settings.playlists.len(),
            "Scheduler running"
        );

        let outcome = tokio::select! {
            _ = shutdown => {
                tracing::info!(target: "scheduler", "Shutdown requested");
                Ok(())
            }
            Some(e) = fatal_rx.recv() => {
                tracing::error!(target: "scheduler", error = %e, "State store failure; stopping");
                Err(e)
            }
        };

        let _ = stop_tx.send(true);
        // In-flight calls are abandoned; their entries are recovered on the next start.
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        outcome
    }
}

async fn pass_loop(
    engine: Arc<Engine>,
    pass: Pass,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    fatal: mpsc::Sender<Error>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        match engine.run_pass(pass).await {
            Ok(_) => {}
            Err(e) if e.is_fatal() => {
                let _ = fatal.send(e).await;
                break;
            }
            Err(e) => {
                tracing::warn!(target: "scheduler", pass = pass.name(), error = %e, "Pass failed");
            }
        }
    }
}

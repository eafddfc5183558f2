//! Commands that run the engine.

use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::runtime::Runtime;

use super::open_store;
use crate::config::Config;
use crate::engine::{Collaborators, Engine, EngineSettings, Scheduler};
use crate::enrichment::AcoustIdTagger;
use crate::providers::downloader::CommandDownloader;
use crate::providers::lidarr::LidarrClient;
use crate::providers::plex::PlexClient;
use crate::providers::spotify::SpotifyClient;

/// Build the real collaborators and the engine around `pool`.
///
/// Fails with every missing setting if the config is incomplete.
pub fn build_engine(config: &Config, pool: SqlitePool) -> anyhow::Result<Arc<Engine>> {
    config.validate()?;

    let timeout = config.timeouts.external_call();
    let downloader = CommandDownloader::new(&config.downloader);
    if !downloader.is_available() {
        tracing::warn!(command = %config.downloader.command, "Downloader command not found; downloads will fail");
    }

    let collaborators = Collaborators {
        provider: Arc::new(SpotifyClient::new(&config.spotify, timeout)?),
        downloader: Arc::new(downloader),
        tagger: Arc::new(AcoustIdTagger::new(&config.tagger, timeout)?),
        library: Arc::new(LidarrClient::new(&config.lidarr, timeout)?),
        media: Arc::new(PlexClient::new(&config.plex, timeout)?),
    };

    Ok(Arc::new(Engine::new(
        pool,
        crate::clock::system(),
        collaborators,
        EngineSettings::from_config(config),
    )))
}

/// Run the scheduler until Ctrl-C
pub fn cmd_watch(rt: &Runtime, config: Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_store(&config).await?;
        let engine = build_engine(&config, pool)?;

        if config.source.playlists.is_empty() {
            tracing::warn!("No playlists configured under [source]; only manual entries will be processed");
        }

        let scheduler = Scheduler::new(engine, config.scheduler.clone());
        scheduler
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await
            .context("scheduler stopped")?;

        println!("Stopped.");
        Ok(())
    })
}

/// Run every pass once and print the resulting stage counts
pub fn cmd_sync(rt: &Runtime, config: Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_store(&config).await?;
        let engine = build_engine(&config, pool.clone())?;

        engine.run_once().await?;

        println!("Sync complete.");
        for (stage, count) in crate::db::entries::stage_counts(&pool).await? {
            println!("  {:<18} {}", stage.as_str(), count);
        }
        Ok(())
    })
}

//! Watched playlist overview and collaborator checks.

use std::path::Path;
use tokio::runtime::Runtime;

use super::open_store;
use crate::config::Config;
use crate::db::snapshots;
use crate::enrichment::Fpcalc;
use crate::providers::downloader::CommandDownloader;
use crate::providers::lidarr::LidarrClient;
use crate::providers::plex::PlexClient;
use crate::providers::spotify::SpotifyClient;
use crate::providers::{LibraryManager, MediaServer, PlaylistProvider, ProviderError};

/// Configured playlists with their last snapshot
pub fn cmd_playlists(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_store(config).await?;
        let stored = snapshots::list_snapshots(&pool).await?;

        if config.source.playlists.is_empty() {
            println!("No playlists configured. Add them under [source] in the config file.");
        }
        for playlist in &config.source.playlists {
            match stored.iter().find(|s| s.playlist_id == playlist.id) {
                Some(snapshot) => println!(
                    "{:<24} {:<26} {:>5} items  polled {}",
                    playlist.name,
                    playlist.id,
                    snapshot.item_count,
                    snapshot
                        .polled_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string())
                ),
                None => println!("{:<24} {:<26}  never polled", playlist.name, playlist.id),
            }
        }

        let orphaned: Vec<_> = stored
            .iter()
            .filter(|s| !config.source.playlists.iter().any(|p| p.id == s.playlist_id))
            .collect();
        if !orphaned.is_empty() {
            println!("\nNo longer watched:");
            for snapshot in orphaned {
                println!(
                    "  {} ({} items)",
                    snapshot.name.as_deref().unwrap_or(&snapshot.playlist_id),
                    snapshot.item_count
                );
            }
        }
        Ok(())
    })
}

fn report(name: &str, result: Result<String, String>) -> bool {
    match result {
        Ok(detail) => {
            println!("  ✓ {:<16} {}", name, detail);
            true
        }
        Err(problem) => {
            println!("  ✗ {:<16} {}", name, problem);
            false
        }
    }
}

fn writable(dir: &Path) -> Result<String, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("{}: {e}", dir.display()))?;
    let probe = dir.join(".music-curator-probe");
    std::fs::write(&probe, b"").map_err(|e| format!("{}: {e}", dir.display()))?;
    let _ = std::fs::remove_file(&probe);
    Ok(dir.display().to_string())
}

async fn check_provider(config: &Config) -> Result<String, String> {
    let client = SpotifyClient::new(&config.spotify, config.timeouts.external_call())
        .map_err(|e| e.to_string())?;
    let Some(first) = config.source.playlists.first() else {
        return Err("no playlists configured".to_string());
    };
    let items = client.list_items(&first.id).await.map_err(|e| e.to_string())?;
    Ok(format!("{} lists {} items", first.name, items.len()))
}

async fn check_library(config: &Config) -> Result<String, ProviderError> {
    LidarrClient::new(&config.lidarr, config.timeouts.external_call())?
        .check()
        .await
}

async fn check_media(config: &Config) -> Result<String, ProviderError> {
    PlexClient::new(&config.plex, config.timeouts.external_call())?
        .check()
        .await
}

/// Check connectivity to every collaborator, external tools and paths
pub fn cmd_check(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    println!("Configuration");
    let mut ok = report(
        "settings",
        config
            .validate()
            .map(|()| "complete".to_string())
            .map_err(|e| e.to_string()),
    );

    println!("\nTools");
    let downloader = CommandDownloader::new(&config.downloader);
    ok &= report(
        "downloader",
        if downloader.is_available() {
            Ok(config.downloader.command.clone())
        } else {
            Err(format!("'{}' not found", config.downloader.command))
        },
    );
    ok &= report(
        "fpcalc",
        match Fpcalc::locate(config.tagger.fpcalc_path.as_deref()) {
            Some(fpcalc) => Ok(fpcalc.version().unwrap_or_else(|| "found".to_string())),
            None => Err("not found; install Chromaprint".to_string()),
        },
    );

    println!("\nPaths");
    ok &= report("downloads", writable(&config.paths.download_dir));
    ok &= report("playlists", writable(&config.paths.playlist_dir));
    let db_path = config.database_path();
    ok &= report(
        "state store",
        match db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => writable(dir).map(|_| db_path.display().to_string()),
            None => Ok(db_path.display().to_string()),
        },
    );

    println!("\nServices");
    let (provider, library, media) = rt.block_on(async {
        tokio::join!(
            check_provider(config),
            check_library(config),
            check_media(config)
        )
    });
    ok &= report("spotify", provider);
    ok &= report("lidarr", library.map_err(|e| e.to_string()));
    ok &= report("plex", media.map_err(|e| e.to_string()));

    println!();
    if ok {
        println!("All checks passed.");
        Ok(())
    } else {
        anyhow::bail!("some checks failed")
    }
}

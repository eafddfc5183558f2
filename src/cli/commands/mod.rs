//! CLI command definitions and dispatch.
//!
//! Each group of subcommands lives in its own submodule:
//! - `engine`: `watch` and `sync`, which drive the engine
//! - `entries`: inspection and administration of Track Entries
//! - `status`: watched playlists and collaborator checks
//! - `settings`: `config init` / `config show`

mod engine;
mod entries;
mod settings;
mod status;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::config::Config;

pub use engine::{cmd_sync, cmd_watch};
pub use entries::{
    cmd_add, cmd_cancel, cmd_info, cmd_list, cmd_remove, cmd_retry_failed, cmd_stats,
};
pub use settings::{cmd_config_init, cmd_config_show};
pub use status::{cmd_check, cmd_playlists};

/// Music Curator CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: OS config dir / music-curator / config.toml)
    #[arg(short, long, global = true, env = "MUSIC_CURATOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler until Ctrl-C
    Watch,
    /// Run every pass once and exit
    Sync,
    /// List tracked entries
    List {
        /// Substring of artist, title or album
        query: Option<String>,
        /// Only entries in this stage (e.g. queued, failed)
        #[arg(long)]
        stage: Option<String>,
        /// Only entries from this playlist id
        #[arg(long)]
        playlist: Option<String>,
        /// Maximum number of rows
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show every field of one entry
    Info {
        /// Entry id
        id: i64,
    },
    /// Delete an entry
    Remove {
        /// Entry id
        id: i64,
    },
    /// Send failed entries back to work, resetting their retry count
    RetryFailed {
        /// Only this entry (default: every failed entry)
        id: Option<i64>,
    },
    /// Stop working on an entry
    Cancel {
        /// Entry id
        id: i64,
    },
    /// Track a song by hand
    Add {
        #[arg(long)]
        artist: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        album: Option<String>,
        /// Provider item id (default: derived from artist and title)
        #[arg(long)]
        item_id: Option<String>,
    },
    /// Entry counts per stage
    Stats,
    /// Watched playlists and their last poll
    Playlists,
    /// Check collaborators, tools and paths
    Check,
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `config` subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

/// Run the specified CLI command with the loaded configuration.
pub fn run_command(cli: &Cli, config: Config) -> anyhow::Result<()> {
    let rt = Runtime::new()?;

    match &cli.command {
        Commands::Watch => cmd_watch(&rt, config),
        Commands::Sync => cmd_sync(&rt, config),
        Commands::List {
            query,
            stage,
            playlist,
            limit,
        } => cmd_list(
            &rt,
            &config,
            query.as_deref(),
            stage.as_deref(),
            playlist.as_deref(),
            *limit,
        ),
        Commands::Info { id } => cmd_info(&rt, &config, *id),
        Commands::Remove { id } => cmd_remove(&rt, &config, *id),
        Commands::RetryFailed { id } => cmd_retry_failed(&rt, &config, *id),
        Commands::Cancel { id } => cmd_cancel(&rt, &config, *id),
        Commands::Add {
            artist,
            title,
            album,
            item_id,
        } => cmd_add(
            &rt,
            &config,
            artist,
            title,
            album.as_deref(),
            item_id.as_deref(),
        ),
        Commands::Stats => cmd_stats(&rt, &config),
        Commands::Playlists => cmd_playlists(&rt, &config),
        Commands::Check => cmd_check(&rt, &config),
        Commands::Config { action } => {
            let path = crate::config::resolve_path(cli.config.as_deref())?;
            match action {
                ConfigAction::Init { force } => cmd_config_init(&path, *force),
                ConfigAction::Show => cmd_config_show(&path, &config),
            }
        }
    }
}

/// Open the State Store named by the config.
async fn open_store(config: &Config) -> anyhow::Result<sqlx::SqlitePool> {
    let path = config.database_path();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let pool = crate::db::init_db(&crate::db::db_url(Some(&path))).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_list_filters() {
        let cli = Cli::try_parse_from(["music-curator", "list", "abba", "--stage", "failed"]).unwrap();
        match cli.command {
            Commands::List { query, stage, .. } => {
                assert_eq!(query.as_deref(), Some("abba"));
                assert_eq!(stage.as_deref(), Some("failed"));
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_cli_parses_add() {
        let cli = Cli::try_parse_from([
            "music-curator",
            "--config",
            "/tmp/c.toml",
            "add",
            "--artist",
            "ABBA",
            "--title",
            "SOS",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Commands::Add { album: None, .. }));
    }

    #[test]
    fn test_cli_parses_config_init() {
        let cli = Cli::try_parse_from(["music-curator", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

//! Music Curator - keeps a music library in step with remote playlists.
//!
//! New playlist items are downloaded, fingerprinted and tagged, handed to the
//! library manager for import, and verified on the media server. Every track
//! is a durable Track Entry moving through a fixed lifecycle, so the process
//! can be stopped and restarted at any point.

pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod hash;
pub mod model;
pub mod providers;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let config_path = config::resolve_path(args.config.as_deref())?;
    let config = config::load(&config_path)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("music_curator={}", config.logging.level))
    })?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    cli::run_command(&args, config)
}

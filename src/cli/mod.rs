//! Command-line interface for music-curator.
//!
//! `watch` and `sync` drive the engine; the other commands inspect or
//! administer Track Entries directly through the State Store, using the
//! same conditional transitions as the workers.

mod commands;

pub use commands::{Cli, Commands, run_command};

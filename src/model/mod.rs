//! Core data model of the track lifecycle.
//!
//! - [`Stage`]: the closed lifecycle graph
//! - [`FailureKind`] / [`Failure`]: classified failures recorded on entries
//! - [`TrackEntry`]: the persisted record of one candidate track
//! - [`PlaylistItem`] / [`PlaylistSnapshot`]: provider items and the
//!   last-seen membership used for diffing
//!
//! # Database Schema
//!
//! - `track_entries` - one row per (playlist, source item), unique on that pair
//! - `playlist_snapshots` / `snapshot_items` - last-seen playlist membership

mod entry;
mod stage;

pub use entry::{Failure, MANUAL_PLAYLIST_ID, PlaylistItem, PlaylistSnapshot, TrackEntry};
pub use stage::{FailureKind, Stage, UnknownStage};

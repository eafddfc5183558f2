//! Plex integration (Media Server).

mod client;
pub mod dto;

pub use client::PlexClient;

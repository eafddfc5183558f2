//! Spotify Web API integration (Playlist Provider).
//!
//! API docs: https://developer.spotify.com/documentation/web-api

mod client;
pub mod dto;

pub use client::SpotifyClient;

//! Spotify Web API Data Transfer Objects
//!
//! These types match what the Spotify API returns for the calls we make.
//! DO NOT use these types outside the spotify module - convert to
//! [`PlaylistItem`](crate::model::PlaylistItem).
//!
//! API Reference: https://developer.spotify.com/documentation/web-api/reference/get-playlists-tracks

use serde::Deserialize;

/// Client-credentials token response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// One page of `GET /playlists/{id}/tracks`
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTracksPage {
    #[serde(default)]
    pub items: Vec<PlaylistTrackItem>,
    /// URL of the next page, absent on the last one
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTrackItem {
    /// Null for removed or unavailable tracks
    pub track: Option<Track>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub uri: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    pub album: Option<Album>,
    /// Local files have no usable id
    #[serde(default)]
    pub is_local: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    pub name: Option<String>,
}

//! AcoustID API Data Transfer Objects
//!
//! These types match what the AcoustID API returns for
//! `meta=recordings+releasegroups`.
//! DO NOT use these types outside the acoustid module - convert to domain types.
//!
//! API Reference: https://acoustid.org/webservice#lookup

use serde::Deserialize;

/// Top-level AcoustID lookup response
#[derive(Debug, Clone, Deserialize)]
pub struct LookupResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<LookupResult>,
    /// Error info if status != "ok"
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i32,
    pub message: String,
}

/// A single fingerprint match result
#[derive(Debug, Clone, Deserialize)]
pub struct LookupResult {
    /// Match confidence (0.0 to 1.0)
    pub score: f32,
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

/// MusicBrainz recording as embedded by AcoustID
#[derive(Debug, Clone, Deserialize)]
pub struct Recording {
    /// MusicBrainz recording ID
    pub id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub releasegroups: Vec<ReleaseGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseGroup {
    /// MusicBrainz release group ID
    pub id: String,
    pub title: Option<String>,
    /// Primary type (Album, Single, EP, etc.)
    #[serde(rename = "type")]
    pub release_type: Option<String>,
}

// ============================================================================
// CONTRACT TESTS
// If these fail, the API has changed and the DTOs need updating.
// ============================================================================

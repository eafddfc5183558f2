//! Internal domain models for track identification.
//!
//! These types are OUR types - they don't change when external APIs change.
//! All external API responses get converted into these types via adapters.

/// Audio fingerprint for a track
#[derive(Debug, Clone)]
pub struct AudioFingerprint {
    /// The fingerprint string (Chromaprint format)
    pub fingerprint: String,
    /// Duration of the audio in seconds (required by AcoustID)
    pub duration_secs: u32,
}

/// One candidate identification of a fingerprint.
///
/// A recording that appears in several release groups yields one
/// candidate per release group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identification {
    /// AcoustID match score (0.0 to 1.0)
    pub score: f32,
    /// MusicBrainz recording ID
    pub recording_id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    /// MusicBrainz artist ID
    pub artist_id: Option<String>,
    /// Release group title
    pub album: Option<String>,
    /// MusicBrainz release-group ID
    pub release_group_id: Option<String>,
    /// Primary release-group type (Album, Single, EP, ...)
    pub release_type: Option<String>,
}

/// Errors that can occur while identifying and tagging a file
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnrichmentError {
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("fpcalc not found. Please install Chromaprint: https://acoustid.org/chromaprint")]
    FpcalcMissing,

    #[error("Failed to generate fingerprint: {message}")]
    Fingerprint { code: Option<i32>, message: String },

    #[error("API request failed: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Rate limited - try again later")]
    RateLimited,

    #[error("Failed to write tags: {0}")]
    Tags(String),
}

//! External collaborators of the engine.
//!
//! # Architecture
//!
//! - **Capability traits** (`traits.rs`) - the narrow boundary the engine
//!   calls through; every collaborator can be swapped for a stub in tests
//! - **Clients** - one module per external system, each split into an HTTP
//!   client and DTOs that match the wire format exactly
//!
//! Concrete collaborators:
//! - [`spotify`] - Playlist Provider (Spotify Web API)
//! - [`downloader`] - Downloader (external command)
//! - [`crate::enrichment`] - Fingerprint/Tag Tool (fpcalc + AcoustID + lofty)
//! - [`lidarr`] - Library Manager (Lidarr v1 API)
//! - [`plex`] - Media Server (Plex)
//!
//! Errors raised here never reach the scheduler: the engine classifies them
//! into a [`FailureKind`](crate::model::FailureKind) at the component
//! boundary.

pub mod downloader;
pub mod lidarr;
pub mod plex;
pub mod spotify;
pub mod traits;

pub use traits::{
    AlbumRef, Downloader, FetchRequest, LibraryManager, MediaServer, PlaylistProvider, TagTool,
    TagVerdict,
};

/// User agent sent to every HTTP collaborator.
pub(crate) const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client configuration.
pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .gzip(true)
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))
}

/// Errors from HTTP collaborators (playlist provider, library manager,
/// media server).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    /// Classify a reqwest failure.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    /// Turn a non-success response into an error, keeping a bit of the body.
    pub(crate) async fn check(response: reqwest::Response) -> Result<reqwest::Response, Self> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(body.chars().take(200).collect()));
        }
        Err(ProviderError::Http {
            status: status.as_u16(),
            message: format!(
                "{} - {}",
                status.canonical_reason().unwrap_or("Unknown"),
                body.chars().take(200).collect::<String>()
            ),
        })
    }
}

/// Downloader outcome other than a file.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Track unobtainable; retrying will not help
    #[error("Track unavailable: {0}")]
    NotFound(String),

    /// Network, rate limit or tool hiccup; worth another attempt
    #[error("Download failed: {0}")]
    Transient(String),
}

/// Tag tool failure (as opposed to a clean "no match" verdict).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TagError {
    #[error("Tag tool timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Tag tool exited with {}: {message}", code.map_or("signal".to_string(), |c| format!("code {c}")))]
    Exit { code: Option<i32>, message: String },

    #[error("Tagging failed: {0}")]
    Failed(String),
}

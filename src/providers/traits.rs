//! Capability traits for the engine's external collaborators.
//!
//! These traits enable dependency injection and mocking for tests.
//! Production code uses the real client implementations, while tests
//! substitute the stubs in [`mocks`].
//!
//! # Example
//!
//! ```ignore
//! use music_curator::providers::{LibraryManager, AlbumRef};
//!
//! async fn already_owned(manager: &dyn LibraryManager, album: &AlbumRef) -> bool {
//!     manager.has_album(album).await.unwrap_or(false)
//! }
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{FetchError, ProviderError, TagError};
use crate::model::{PlaylistItem, TrackEntry};

/// Source of watched playlist contents.
#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    /// Current items of a playlist, in playlist order.
    async fn list_items(&self, playlist_id: &str) -> Result<Vec<PlaylistItem>, ProviderError>;
}

/// What to download and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Provider item id (e.g. `spotify:track:...`)
    pub item_id: String,
    pub artist: String,
    pub title: String,
    /// Per-entry staging folder
    pub output_dir: PathBuf,
}

impl FetchRequest {
    pub fn for_entry(entry: &TrackEntry, download_root: &Path) -> Self {
        Self {
            item_id: entry.source_item_id.clone(),
            artist: entry.artist.clone(),
            title: entry.title.clone(),
            output_dir: download_root.join(entry.id.to_string()),
        }
    }
}

/// Fetches audio files.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download one track, returning the local file.
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf, FetchError>;
}

/// Verdict of a clean tag tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagVerdict {
    /// File rewritten with canonical metadata
    Matched { album_id: String, track_id: String },
    /// No confident identification
    NoMatch,
}

/// Identifies a file and rewrites its tags in place.
#[async_trait]
pub trait TagTool: Send + Sync {
    async fn run(&self, path: &Path, timeout: Duration) -> Result<TagVerdict, TagError>;
}

/// How an album is looked up in the library manager.
///
/// Before tagging only the names are known; afterwards the MusicBrainz
/// release-group id is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumRef {
    pub artist: String,
    pub album: Option<String>,
    /// MusicBrainz release-group id
    pub album_id: Option<String>,
}

impl AlbumRef {
    pub fn for_entry(entry: &TrackEntry) -> Self {
        Self {
            artist: entry.artist.clone(),
            album: entry.album.clone(),
            album_id: entry.album_id.clone(),
        }
    }
}

/// The library manager (catalog, download queue, import scans).
#[async_trait]
pub trait LibraryManager: Send + Sync {
    /// Whether the album is in the catalog with files on disk.
    async fn has_album(&self, album: &AlbumRef) -> Result<bool, ProviderError>;

    /// Whether the album is in the manager's own acquisition queue.
    async fn queue_contains(&self, album: &AlbumRef) -> Result<bool, ProviderError>;

    /// Ask for an import scan of one folder. Returns the request id.
    async fn trigger_scan(&self, path: &Path) -> Result<String, ProviderError>;

    /// Where the library filed the recording after import, if it has.
    async fn imported_path(
        &self,
        album: &AlbumRef,
        recording_id: &str,
    ) -> Result<Option<PathBuf>, ProviderError>;

    /// Connectivity check; returns a version string.
    async fn check(&self) -> Result<String, ProviderError>;
}

/// The media server that ultimately serves the library.
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Whether the server has indexed this file.
    async fn path_indexed(&self, path: &Path) -> Result<bool, ProviderError>;

    /// Replace the named playlist with these files, in order.
    async fn sync_playlist(&self, name: &str, items: &[PathBuf]) -> Result<(), ProviderError>;

    /// Connectivity check; returns a version string.
    async fn check(&self) -> Result<String, ProviderError>;
}

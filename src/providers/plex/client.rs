//! Plex Media Server client (Media Server).
//!
//! Visibility is decided against the file list of the configured music
//! section. The list is cached briefly so that one verification sweep
//! costs one library request rather than one per entry.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::dto;
use crate::config::PlexConfig;
use crate::providers::{MediaServer, ProviderError};

/// How long a fetched file list is reused.
const INDEX_TTL: Duration = Duration::from_secs(60);

/// Plex item type for tracks.
const TRACK_TYPE: u32 = 10;

/// Indexed files of the music section, keyed by full path and by file name.
#[derive(Debug, Default)]
pub(crate) struct FileIndex {
    by_path: HashMap<PathBuf, String>,
    by_name: HashMap<OsString, String>,
}

impl FileIndex {
    fn from_tracks(tracks: dto::TrackList) -> Self {
        let mut index = FileIndex::default();
        for track in tracks.metadata {
            let files = track
                .media
                .iter()
                .flat_map(|m| m.parts.iter())
                .filter_map(|p| p.file.as_deref());
            for file in files {
                let path = PathBuf::from(file);
                if let Some(name) = path.file_name() {
                    index.by_name.insert(name.to_os_string(), track.rating_key.clone());
                }
                index.by_path.insert(path, track.rating_key.clone());
            }
        }
        index
    }

    /// Rating key of the item for `path`, by exact path or by file name.
    ///
    /// The file-name fallback covers servers that mount the library under
    /// a different root than this process does.
    fn lookup(&self, path: &Path) -> Option<&str> {
        self.by_path
            .get(path)
            .or_else(|| path.file_name().and_then(|n| self.by_name.get(n)))
            .map(String::as_str)
    }

    fn len(&self) -> usize {
        self.by_path.len()
    }
}

struct CachedIndex {
    fetched_at: Instant,
    index: Arc<FileIndex>,
}

/// Plex API client
pub struct PlexClient {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
    section_id: u32,
    index: Mutex<Option<CachedIndex>>,
}

impl PlexClient {
    pub fn new(config: &PlexConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("plex.url".into()))?;
        let token = config
            .token
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("plex.token".into()))?;
        let section_id = config
            .section_id
            .ok_or_else(|| ProviderError::NotConfigured("plex.section_id".into()))?;

        Ok(Self {
            http_client: crate::providers::http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            section_id,
            index: Mutex::new(None),
        })
    }

    fn request(&self, method: reqwest::Method, path_and_query: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path_and_query))
            .header("X-Plex-Token", &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn get<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, ProviderError> {
        let response = self
            .request(reqwest::Method::GET, path_and_query)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let envelope: dto::Envelope<T> = ProviderError::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(envelope.container)
    }

    async fn send(&self, method: reqwest::Method, path_and_query: &str) -> Result<(), ProviderError> {
        let response = self
            .request(method, path_and_query)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        ProviderError::check(response).await?;
        Ok(())
    }

    /// File list of the music section, cached for [`INDEX_TTL`].
    async fn file_index(&self, refresh: bool) -> Result<Arc<FileIndex>, ProviderError> {
        let mut cached = self.index.lock().await;
        if !refresh
            && let Some(c) = cached.as_ref()
            && c.fetched_at.elapsed() < INDEX_TTL
        {
            return Ok(Arc::clone(&c.index));
        }

        let tracks: dto::TrackList = self
            .get(&format!(
                "/library/sections/{}/all?type={TRACK_TYPE}",
                self.section_id
            ))
            .await?;
        let index = Arc::new(FileIndex::from_tracks(tracks));
        tracing::debug!(target: "verify", files = index.len(), "Fetched Plex file list");

        *cached = Some(CachedIndex {
            fetched_at: Instant::now(),
            index: Arc::clone(&index),
        });
        Ok(index)
    }

    async fn identity(&self) -> Result<dto::Identity, ProviderError> {
        self.get("/identity").await
    }
}

#[async_trait]
impl MediaServer for PlexClient {
    async fn path_indexed(&self, path: &Path) -> Result<bool, ProviderError> {
        Ok(self.file_index(false).await?.lookup(path).is_some())
    }

    async fn sync_playlist(&self, name: &str, items: &[PathBuf]) -> Result<(), ProviderError> {
        let identity = self.identity().await?;
        let index = self.file_index(true).await?;
        let keys: Vec<&str> = items.iter().filter_map(|p| index.lookup(p)).collect();

        let existing: dto::PlaylistList = self.get("/playlists?playlistType=audio").await?;
        for playlist in existing.metadata.iter().filter(|p| p.title == name) {
            self.send(
                reqwest::Method::DELETE,
                &format!("/playlists/{}", playlist.rating_key),
            )
            .await?;
        }

        if keys.is_empty() {
            return Ok(());
        }

        let uri = format!(
            "server://{}/com.plexapp.plugins.library/library/metadata/{}",
            identity.machine_identifier,
            keys.join(",")
        );
        self.send(
            reqwest::Method::POST,
            &format!(
                "/playlists?type=audio&smart=0&title={}&uri={}",
                urlencoding::encode(name),
                urlencoding::encode(&uri)
            ),
        )
        .await?;

        tracing::info!(target: "playlists", name, tracks = keys.len(), "Synced Plex playlist");
        Ok(())
    }

    async fn check(&self) -> Result<String, ProviderError> {
        let identity = self.identity().await?;
        Ok(identity.version.unwrap_or(identity.machine_identifier))
    }
}

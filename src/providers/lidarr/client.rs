//! Lidarr v1 API client (Library Manager).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::dto;
use crate::config::LidarrConfig;
use crate::providers::{AlbumRef, LibraryManager, ProviderError};

/// Queue records fetched per check; the queue is rarely longer.
const QUEUE_PAGE_SIZE: u32 = 1000;

/// Lidarr API client
pub struct LidarrClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// Case- and whitespace-insensitive name comparison.
fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Whether an album returned by Lidarr is the one referenced.
fn album_matches(album: &dto::Album, artist: Option<&dto::Artist>, wanted: &AlbumRef) -> bool {
    if let Some(id) = &wanted.album_id {
        return album.foreign_album_id == *id;
    }
    let Some(title) = &wanted.album else {
        return false;
    };
    let artist_ok = artist
        .or(album.artist.as_ref())
        .is_some_and(|a| same_name(&a.artist_name, &wanted.artist));
    artist_ok && same_name(&album.title, title)
}

/// Library path of the file holding `recording_id`.
fn recording_file(
    tracks: &[dto::Track],
    files: &[dto::TrackFile],
    recording_id: &str,
) -> Option<PathBuf> {
    let file_id = tracks
        .iter()
        .find(|t| t.foreign_recording_id == recording_id && t.track_file_id > 0)?
        .track_file_id;
    files
        .iter()
        .find(|f| f.id == file_id)
        .map(|f| PathBuf::from(&f.path))
}

impl LidarrClient {
    pub fn new(config: &LidarrConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("lidarr.url".into()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("lidarr.api_key".into()))?;

        Ok(Self {
            http_client: crate::providers::http_client(timeout)?,
            base_url: format!("{}/api/v1", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, ProviderError> {
        let response = self
            .http_client
            .get(format!("{}{}", self.base_url, path_and_query))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        ProviderError::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    /// Albums that could be the referenced one.
    async fn candidate_albums(&self, wanted: &AlbumRef) -> Result<Vec<dto::Album>, ProviderError> {
        if let Some(id) = &wanted.album_id {
            return self
                .get(&format!("/album?foreignAlbumId={}", urlencoding::encode(id)))
                .await;
        }
        if wanted.album.is_none() {
            return Ok(Vec::new());
        }

        let artists: Vec<dto::Artist> = self.get("/artist").await?;
        let Some(artist) = artists
            .iter()
            .find(|a| same_name(&a.artist_name, &wanted.artist))
        else {
            return Ok(Vec::new());
        };
        let mut albums: Vec<dto::Album> = self.get(&format!("/album?artistId={}", artist.id)).await?;
        for album in &mut albums {
            album.artist.get_or_insert_with(|| artist.clone());
        }
        Ok(albums)
    }
}

#[async_trait]
impl LibraryManager for LidarrClient {
    async fn has_album(&self, album: &AlbumRef) -> Result<bool, ProviderError> {
        let found = self
            .candidate_albums(album)
            .await?
            .iter()
            .any(|candidate| candidate.has_files() && album_matches(candidate, None, album));
        Ok(found)
    }

    async fn queue_contains(&self, album: &AlbumRef) -> Result<bool, ProviderError> {
        let page: dto::QueuePage = self
            .get(&format!(
                "/queue?page=1&pageSize={QUEUE_PAGE_SIZE}&includeArtist=true&includeAlbum=true"
            ))
            .await?;

        Ok(page.records.iter().any(|record| {
            record
                .album
                .as_ref()
                .is_some_and(|a| album_matches(a, record.artist.as_ref(), album))
        }))
    }

    async fn trigger_scan(&self, path: &Path) -> Result<String, ProviderError> {
        let command = dto::ScanCommand {
            name: "DownloadedAlbumsScan",
            path: path.to_string_lossy().into_owned(),
        };
        let response = self
            .http_client
            .post(format!("{}/command", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(&command)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let created: dto::CommandResponse = ProviderError::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(created.id.to_string())
    }

    async fn imported_path(
        &self,
        album: &AlbumRef,
        recording_id: &str,
    ) -> Result<Option<PathBuf>, ProviderError> {
        let candidates = self.candidate_albums(album).await?;
        for candidate in candidates
            .iter()
            .filter(|c| c.has_files() && album_matches(c, None, album))
        {
            let tracks: Vec<dto::Track> =
                self.get(&format!("/track?albumId={}", candidate.id)).await?;
            if !tracks.iter().any(|t| t.foreign_recording_id == recording_id) {
                continue;
            }
            let files: Vec<dto::TrackFile> =
                self.get(&format!("/trackfile?albumId={}", candidate.id)).await?;
            if let Some(path) = recording_file(&tracks, &files, recording_id) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    async fn check(&self) -> Result<String, ProviderError> {
        let status: dto::SystemStatus = self.get("/system/status").await?;
        Ok(status.version)
    }
}

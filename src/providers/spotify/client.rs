//! Spotify Web API client (client-credentials flow).
//!
//! Only public playlists are readable with client credentials, which is all
//! the watcher needs.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::dto;
use crate::config::SpotifyConfig;
use crate::model::PlaylistItem;
use crate::providers::{PlaylistProvider, ProviderError};

/// Tracks requested per page (API maximum).
const PAGE_SIZE: u32 = 100;

/// Refresh tokens this long before they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Spotify API client
pub struct SpotifyClient {
    http_client: reqwest::Client,
    api_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    /// Create a client from config.
    pub fn new(config: &SpotifyConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("spotify.client_id".into()))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("spotify.client_secret".into()))?;

        Ok(Self {
            http_client: crate::providers::http_client(timeout)?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    /// Return a valid access token, fetching a new one when needed.
    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let token: dto::TokenResponse = ProviderError::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        tracing::debug!(target: "watcher", expires_in = token.expires_in, "Fetched Spotify token");
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_MARGIN);
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn fetch_page(&self, url: &str) -> Result<dto::PlaylistTracksPage, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked early; force a refresh on the next call.
            *self.token.lock().await = None;
        }

        ProviderError::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

/// Convert one page into playlist items, dropping local and removed tracks.
fn to_items(page: dto::PlaylistTracksPage) -> Vec<PlaylistItem> {
    page.items
        .into_iter()
        .filter_map(|item| item.track)
        .filter(|track| !track.is_local)
        .filter_map(|track| {
            let uri = track.uri?;
            let artist = track
                .artists
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let mut item = PlaylistItem::new(uri, artist, track.name);
            item.album = track.album.and_then(|a| a.name);
            Some(item)
        })
        .collect()
}

#[async_trait]
impl PlaylistProvider for SpotifyClient {
    async fn list_items(&self, playlist_id: &str) -> Result<Vec<PlaylistItem>, ProviderError> {
        let mut url = Some(format!(
            "{}/playlists/{}/tracks?limit={}",
            self.api_url,
            urlencoding::encode(playlist_id),
            PAGE_SIZE
        ));
        let mut items = Vec::new();

        while let Some(next) = url {
            let page = self.fetch_page(&next).await?;
            url = page.next.clone();
            items.extend(to_items(page));
        }

        tracing::debug!(target: "watcher", playlist_id, count = items.len(), "Fetched playlist");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_items_joins_artists_and_skips_local() {
        let json = r#"{
            "items": [
                {"track": {"uri": "spotify:track:1", "name": "Song",
                           "artists": [{"name": "A"}, {"name": "B"}],
                           "album": {"name": "LP"}}},
                {"track": {"uri": "spotify:local:x", "name": "Local", "is_local": true}},
                {"track": {"name": "No uri"}},
                {"track": null}
            ]
        }"#;
        let page: dto::PlaylistTracksPage = serde_json::from_str(json).unwrap();

        let items = to_items(page);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "spotify:track:1");
        assert_eq!(items[0].artist, "A, B");
        assert_eq!(items[0].album.as_deref(), Some("LP"));
    }

    #[test]
    fn test_client_requires_credentials() {
        let config = SpotifyConfig::default();
        let result = SpotifyClient::new(&config, Duration::from_secs(5));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));

        let config = SpotifyConfig {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            ..Default::default()
        };
        let client = SpotifyClient::new(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(client.api_url, "https://api.spotify.com/v1");
    }
}

//! AcoustID HTTP client
//!
//! Handles communication with the AcoustID web service.
//! See: https://acoustid.org/webservice
//!
//! ## URL Encoding of the meta parameter
//! The API uses `+` as a separator in `meta` (e.g. `recordings+releasegroups`)
//! and does NOT recognize `%2B`; with `%2B` it silently returns results
//! without metadata. The URL is therefore built by hand, and reqwest's
//! `.query()` is not used.

use std::time::Duration;

use super::{adapter, dto};
use crate::enrichment::domain::{AudioFingerprint, EnrichmentError, Identification};

/// AcoustID API client
pub struct AcoustIdClient {
    api_key: String,
    http_client: reqwest::Client,
    base_url: String,
}

impl AcoustIdClient {
    /// Create a new client with the given API key
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, EnrichmentError> {
        let http_client = crate::providers::http_client(timeout)
            .map_err(|e| EnrichmentError::Network(e.to_string()))?;

        Ok(Self {
            api_key: api_key.into(),
            http_client,
            base_url: "https://api.acoustid.org/v2/lookup".to_string(),
        })
    }

    /// Look up a fingerprint and return candidate identifications
    pub async fn lookup(
        &self,
        fingerprint: &AudioFingerprint,
    ) -> Result<Vec<Identification>, EnrichmentError> {
        let url = self.lookup_url(fingerprint);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| EnrichmentError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EnrichmentError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichmentError::Network(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed = response
            .json::<dto::LookupResponse>()
            .await
            .map_err(|e| EnrichmentError::Parse(e.to_string()))?;
        adapter::to_identifications(parsed)
    }

    fn lookup_url(&self, fingerprint: &AudioFingerprint) -> String {
        // The literal + separators must survive; see module docs.
        format!(
            "{}?client={}&duration={}&fingerprint={}&meta=recordings+releasegroups+compress",
            self.base_url,
            urlencoding::encode(&self.api_key),
            fingerprint.duration_secs,
            urlencoding::encode(&fingerprint.fingerprint)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_url_keeps_plus_separators() {
        let client = AcoustIdClient::new("k&y", Duration::from_secs(5)).unwrap();
        let url = client.lookup_url(&AudioFingerprint {
            fingerprint: "AQAD+/x".into(),
            duration_secs: 201,
        });
        assert!(url.contains("meta=recordings+releasegroups+compress"));
        assert!(url.contains("client=k%26y"));
        assert!(url.contains("fingerprint=AQAD%2B%2Fx"));
        assert!(url.contains("duration=201"));
    }
}

//! The Fingerprint/Tag Tool: fpcalc + AcoustID + lofty.
//!
//! One run fingerprints the file, looks the fingerprint up, picks the best
//! confident identification and rewrites the file's tags with it.
//! `album_id` is the MusicBrainz release-group id, `track_id` the
//! recording id.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use super::acoustid::{AcoustIdClient, best_identification};
use super::domain::EnrichmentError;
use super::fingerprint::Fpcalc;
use super::tags::write_identification;
use crate::config::TaggerConfig;
use crate::providers::{TagError, TagTool, TagVerdict};

/// Tag tool backed by AcoustID.
pub struct AcoustIdTagger {
    fpcalc: Option<Fpcalc>,
    client: AcoustIdClient,
    min_confidence: f32,
}

impl AcoustIdTagger {
    pub fn new(config: &TaggerConfig, timeout: Duration) -> Result<Self, EnrichmentError> {
        let api_key = config
            .acoustid_api_key
            .clone()
            .ok_or_else(|| EnrichmentError::NotConfigured("tagger.acoustid_api_key".into()))?;

        let fpcalc = Fpcalc::locate(config.fpcalc_path.as_deref());
        if fpcalc.is_none() {
            tracing::warn!(target: "identify", "fpcalc not found; identification will fail until it is installed");
        }

        Ok(Self {
            fpcalc,
            client: AcoustIdClient::new(api_key, timeout)?,
            min_confidence: config.min_confidence,
        })
    }

    /// The located fpcalc, if any.
    pub fn fpcalc(&self) -> Option<&Fpcalc> {
        self.fpcalc.as_ref()
    }

    async fn identify_and_tag(&self, path: &Path) -> Result<TagVerdict, EnrichmentError> {
        let fpcalc = self.fpcalc.as_ref().ok_or(EnrichmentError::FpcalcMissing)?;
        let fingerprint = fpcalc.fingerprint(path).await?;
        let candidates = self.client.lookup(&fingerprint).await?;
        let count = candidates.len();

        let Some(best) = best_identification(candidates, self.min_confidence) else {
            tracing::info!(target: "identify", path = %path.display(), candidates = count, "No confident match");
            return Ok(TagVerdict::NoMatch);
        };
        let Some(album_id) = best.release_group_id.clone() else {
            return Ok(TagVerdict::NoMatch);
        };

        tracing::debug!(
            target: "identify",
            path = %path.display(),
            score = best.score,
            album = ?best.album,
            "Identified"
        );

        let file = path.to_path_buf();
        let identification = best.clone();
        tokio::task::spawn_blocking(move || write_identification(&file, &identification))
            .await
            .map_err(|e| EnrichmentError::Tags(e.to_string()))??;

        Ok(TagVerdict::Matched {
            album_id,
            track_id: best.recording_id,
        })
    }
}

/// Map an enrichment failure onto the tag tool's error contract.
fn to_tag_error(err: EnrichmentError) -> TagError {
    match err {
        EnrichmentError::Fingerprint { code, message } => TagError::Exit { code, message },
        other => TagError::Failed(other.to_string()),
    }
}

#[async_trait]
impl TagTool for AcoustIdTagger {
    async fn run(&self, path: &Path, timeout: Duration) -> Result<TagVerdict, TagError> {
        match tokio::time::timeout(timeout, self.identify_and_tag(path)).await {
            Ok(result) => result.map_err(to_tag_error),
            Err(_) => Err(TagError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let result = AcoustIdTagger::new(&TaggerConfig::default(), Duration::from_secs(5));
        assert!(matches!(result, Err(EnrichmentError::NotConfigured(_))));
    }

    #[test]
    fn test_error_mapping() {
        let exit = to_tag_error(EnrichmentError::Fingerprint {
            code: Some(2),
            message: "decode error".into(),
        });
        assert!(matches!(exit, TagError::Exit { code: Some(2), .. }));
        assert!(matches!(
            to_tag_error(EnrichmentError::RateLimited),
            TagError::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_fpcalc_is_a_tool_failure() {
        let config = TaggerConfig {
            acoustid_api_key: Some("key".into()),
            fpcalc_path: Some("/nonexistent/fpcalc".into()),
            ..Default::default()
        };
        let tagger = AcoustIdTagger::new(&config, Duration::from_secs(5)).unwrap();
        assert!(tagger.fpcalc().is_none());

        let err = tagger
            .run(Path::new("/tmp/song.flac"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TagError::Failed(msg) if msg.contains("fpcalc")));
    }
}

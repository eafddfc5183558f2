//! Adapter layer: Convert AcoustID DTOs to domain models
//!
//! This is the ONLY place where DTO types are converted to domain types.

use super::dto;
use crate::enrichment::domain::{EnrichmentError, Identification};

/// AcoustID error code for rate limiting.
const RATE_LIMIT_CODE: i32 = 14;

/// Convert an AcoustID lookup response to domain identifications
pub fn to_identifications(
    response: dto::LookupResponse,
) -> Result<Vec<Identification>, EnrichmentError> {
    if response.status != "ok" {
        return Err(match response.error {
            Some(e) if e.code == RATE_LIMIT_CODE => EnrichmentError::RateLimited,
            Some(e) => EnrichmentError::Api(e.message),
            None => EnrichmentError::Api("Unknown error".to_string()),
        });
    }

    Ok(response
        .results
        .into_iter()
        .flat_map(|result| {
            let score = result.score;
            result
                .recordings
                .into_iter()
                .flat_map(move |recording| expand_recording(recording, score))
        })
        .collect())
}

/// One identification per release group, or a single one without album
/// information when the recording has none.
fn expand_recording(recording: dto::Recording, score: f32) -> Vec<Identification> {
    let base = Identification {
        score,
        recording_id: recording.id,
        title: recording.title,
        artist: recording.artists.first().map(|a| a.name.clone()),
        artist_id: recording.artists.first().map(|a| a.id.clone()),
        album: None,
        release_group_id: None,
        release_type: None,
    };

    if recording.releasegroups.is_empty() {
        return vec![base];
    }

    recording
        .releasegroups
        .into_iter()
        .map(|rg| Identification {
            album: rg.title,
            release_group_id: Some(rg.id),
            release_type: rg.release_type,
            ..base.clone()
        })
        .collect()
}

/// Pick the identification to tag with.
///
/// Highest score wins; among equal scores a proper album beats a single or
/// compilation so that the library manager files the track with its album.
/// Candidates below `min_confidence` or without a release group are not
/// confident matches.
pub fn best_identification(
    identifications: Vec<Identification>,
    min_confidence: f32,
) -> Option<Identification> {
    identifications
        .into_iter()
        .filter(|i| i.score >= min_confidence && i.release_group_id.is_some())
        .max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| album_rank(a).cmp(&album_rank(b)))
        })
}

fn album_rank(identification: &Identification) -> u8 {
    match identification.release_type.as_deref() {
        Some(t) if t.eq_ignore_ascii_case("album") => 2,
        Some(t) if t.eq_ignore_ascii_case("ep") => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(groups: &[(&str, &str, &str)]) -> dto::Recording {
        dto::Recording {
            id: "rec-1".into(),
            title: Some("TrackY".into()),
            artists: vec![dto::Artist {
                id: "art-1".into(),
                name: "ArtistX".into(),
            }],
            releasegroups: groups
                .iter()
                .map(|(id, title, kind)| dto::ReleaseGroup {
                    id: id.to_string(),
                    title: Some(title.to_string()),
                    release_type: Some(kind.to_string()),
                })
                .collect(),
        }
    }

    fn response(score: f32, recordings: Vec<dto::Recording>) -> dto::LookupResponse {
        dto::LookupResponse {
            status: "ok".into(),
            results: vec![dto::LookupResult { score, recordings }],
            error: None,
        }
    }

    #[test]
    fn test_expands_release_groups() {
        let ids = to_identifications(response(
            0.9,
            vec![recording(&[("rg-a", "The Album", "Album"), ("rg-s", "TrackY", "Single")])],
        ))
        .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].release_group_id.as_deref(), Some("rg-a"));
        assert_eq!(ids[0].artist.as_deref(), Some("ArtistX"));
        assert!((ids[1].score - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_error_status() {
        let rate_limited = dto::LookupResponse {
            status: "error".into(),
            results: vec![],
            error: Some(dto::ApiError {
                code: 14,
                message: "slow down".into(),
            }),
        };
        assert!(matches!(
            to_identifications(rate_limited),
            Err(EnrichmentError::RateLimited)
        ));
    }

    #[test]
    fn test_best_prefers_album_over_single() {
        let ids = to_identifications(response(
            0.9,
            vec![recording(&[("rg-s", "TrackY", "Single"), ("rg-a", "The Album", "Album")])],
        ))
        .unwrap();
        let best = best_identification(ids, 0.8).unwrap();
        assert_eq!(best.release_group_id.as_deref(), Some("rg-a"));
    }

    #[test]
    fn test_best_respects_confidence_and_release_group() {
        let low = to_identifications(response(0.5, vec![recording(&[("rg", "The Album", "Album")])])).unwrap();
        assert!(best_identification(low, 0.8).is_none());

        let no_group = to_identifications(response(0.99, vec![recording(&[])])).unwrap();
        assert_eq!(no_group.len(), 1);
        assert!(best_identification(no_group, 0.8).is_none());

        assert!(best_identification(vec![], 0.0).is_none());
    }
}

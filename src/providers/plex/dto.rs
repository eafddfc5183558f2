//! Plex Media Server API Data Transfer Objects (JSON flavour).
//!
//! Every response is wrapped in a `MediaContainer` object.
//! DO NOT use these types outside the plex module.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    pub container: T,
}

/// `GET /library/sections/{id}/all?type=10`
#[derive(Debug, Clone, Deserialize)]
pub struct TrackList {
    #[serde(rename = "Metadata", default)]
    pub metadata: Vec<TrackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackMetadata {
    #[serde(rename = "ratingKey")]
    pub rating_key: String,
    #[serde(rename = "Media", default)]
    pub media: Vec<Media>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Media {
    #[serde(rename = "Part", default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    pub file: Option<String>,
}

/// `GET /identity`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub machine_identifier: String,
    pub version: Option<String>,
}

/// `GET /playlists`
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistList {
    #[serde(rename = "Metadata", default)]
    pub metadata: Vec<PlaylistMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistMetadata {
    #[serde(rename = "ratingKey")]
    pub rating_key: String,
    pub title: String,
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    #[test]
    fn test_parse_track_list() {
        let json = r#"{"MediaContainer": {
            "size": 1,
            "Metadata": [{
                "ratingKey": "4711",
                "title": "Paranoid Android",
                "Media": [{"Part": [{"file": "/music/Radiohead/OK Computer/02 Paranoid Android.flac"}]}]
            }]
        }}"#;

        let list: Envelope<TrackList> = serde_json::from_str(json).expect("Should parse tracks");
        let track = &list.container.metadata[0];
        assert_eq!(track.rating_key, "4711");
        assert_eq!(
            track.media[0].parts[0].file.as_deref(),
            Some("/music/Radiohead/OK Computer/02 Paranoid Android.flac")
        );
    }

    #[test]
    fn test_parse_empty_section() {
        let json = r#"{"MediaContainer": {"size": 0}}"#;
        let list: Envelope<TrackList> = serde_json::from_str(json).expect("Should parse empty");
        assert!(list.container.metadata.is_empty());
    }

    #[test]
    fn test_parse_identity() {
        let json = r#"{"MediaContainer": {"size": 0, "machineIdentifier": "abc123", "version": "1.40.0"}}"#;
        let identity: Envelope<Identity> = serde_json::from_str(json).expect("Should parse identity");
        assert_eq!(identity.container.machine_identifier, "abc123");
    }
}

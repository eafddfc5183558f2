//! Lidarr v1 API Data Transfer Objects
//!
//! Only the fields the reconciler reads are declared; serde ignores the rest.
//! DO NOT use these types outside the lidarr module.
//!
//! API Reference: https://lidarr.audio/docs/api/

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: i64,
    pub title: String,
    /// MusicBrainz release-group id
    pub foreign_album_id: String,
    #[serde(default)]
    pub monitored: bool,
    pub statistics: Option<AlbumStatistics>,
    pub artist: Option<Artist>,
}

impl Album {
    /// At least one track of the album is on disk.
    pub fn has_files(&self) -> bool {
        self.statistics
            .as_ref()
            .is_some_and(|s| s.track_file_count > 0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumStatistics {
    #[serde(default)]
    pub track_file_count: i64,
    #[serde(default)]
    pub track_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: i64,
    pub artist_name: String,
}

/// `GET /track?albumId=`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: i64,
    /// MusicBrainz recording id
    #[serde(default)]
    pub foreign_recording_id: String,
    /// 0 when the track has no file
    #[serde(default)]
    pub track_file_id: i64,
}

/// `GET /trackfile?albumId=`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackFile {
    pub id: i64,
    pub path: String,
}

/// `GET /queue` page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePage {
    #[serde(default)]
    pub records: Vec<QueueRecord>,
    #[serde(default)]
    pub total_records: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub title: Option<String>,
    pub album: Option<Album>,
    pub artist: Option<Artist>,
}

/// `POST /command` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCommand {
    pub name: &'static str,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponse {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemStatus {
    pub version: String,
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    #[test]
    fn test_parse_album_list() {
        let json = r#"[{
            "id": 12,
            "title": "OK Computer",
            "foreignAlbumId": "b1392450-e666-3926-a536-22c65f834433",
            "monitored": true,
            "statistics": {"trackFileCount": 12, "trackCount": 12, "percentOfTracks": 100.0},
            "artist": {"id": 3, "artistName": "Radiohead"}
        }]"#;

        let albums: Vec<Album> = serde_json::from_str(json).expect("Should parse albums");
        assert_eq!(albums[0].foreign_album_id, "b1392450-e666-3926-a536-22c65f834433");
        assert!(albums[0].has_files());
        assert_eq!(albums[0].artist.as_ref().unwrap().artist_name, "Radiohead");
    }

    #[test]
    fn test_album_without_statistics_has_no_files() {
        let json = r#"{"id": 1, "title": "X", "foreignAlbumId": "rg"}"#;
        let album: Album = serde_json::from_str(json).expect("Should parse sparse album");
        assert!(!album.has_files());
    }

    #[test]
    fn test_parse_queue_page() {
        let json = r#"{
            "page": 1, "pageSize": 1000, "totalRecords": 1,
            "records": [{
                "title": "Radiohead - OK Computer",
                "album": {"id": 12, "title": "OK Computer", "foreignAlbumId": "rg-1"},
                "artist": {"id": 3, "artistName": "Radiohead"}
            }]
        }"#;
        let page: QueuePage = serde_json::from_str(json).expect("Should parse queue");
        assert_eq!(page.total_records, 1);
        assert_eq!(page.records[0].album.as_ref().unwrap().foreign_album_id, "rg-1");
    }

    #[test]
    fn test_parse_tracks_and_files() {
        let tracks = r#"[
            {"id": 101, "foreignRecordingId": "rec-1", "trackFileId": 55, "hasFile": true},
            {"id": 102, "foreignRecordingId": "rec-2", "trackFileId": 0, "hasFile": false}
        ]"#;
        let tracks: Vec<Track> = serde_json::from_str(tracks).expect("Should parse tracks");
        assert_eq!(tracks[0].track_file_id, 55);
        assert_eq!(tracks[1].foreign_recording_id, "rec-2");

        let files = r#"[{"id": 55, "path": "/music/Radiohead/OK Computer/01 - Airbag.flac", "size": 1024}]"#;
        let files: Vec<TrackFile> = serde_json::from_str(files).expect("Should parse track files");
        assert_eq!(files[0].path, "/music/Radiohead/OK Computer/01 - Airbag.flac");
    }

    #[test]
    fn test_serialize_scan_command() {
        let cmd = ScanCommand {
            name: "DownloadedAlbumsScan",
            path: "/downloads/42".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"name":"DownloadedAlbumsScan","path":"/downloads/42"}"#);
    }
}

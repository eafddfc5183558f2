//! Lidarr integration (Library Manager).
//!
//! - catalog lookup by MusicBrainz release-group id, or by artist/album name
//!   before a file has been tagged
//! - download queue lookup
//! - library path of an imported recording (`/track` + `/trackfile`)
//! - `DownloadedAlbumsScan` import scans scoped to one staging folder

mod client;
pub mod dto;

pub use client::LidarrClient;

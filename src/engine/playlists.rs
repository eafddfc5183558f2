//! Derived playlists.
//!
//! Each watched playlist is mirrored, in provider order, as the verified
//! files it maps to: an M3U file next to the library and/or a playlist on
//! the media server. Failures here never touch entry stages.

use std::path::{Component, Path, PathBuf};

use crate::config::WatchedPlaylist;
use crate::db::entries;
use crate::error::{Result, ResultExt};

use super::{Engine, within};

impl Engine {
    /// Rebuild every derived playlist. Returns how many playlists had
    /// at least one verified track.
    pub async fn sync_playlists(&self) -> Result<usize> {
        let mut synced = 0;
        for playlist in &self.settings.playlists {
            let paths = entries::verified_paths(&self.pool, &playlist.id).await?;
            if paths.is_empty() {
                continue;
            }
            synced += 1;

            if self.settings.m3u_playlists {
                match write_m3u(&self.settings.playlist_dir, &playlist.name, &paths) {
                    Ok(file) => {
                        tracing::debug!(target: "playlists", playlist = %playlist.id, file = %file.display(), tracks = paths.len(), "Wrote M3U");
                    }
                    Err(e) => {
                        tracing::warn!(target: "playlists", playlist = %playlist.id, error = %e, "Failed to write M3U");
                    }
                }
            }

            if self.settings.media_server_playlists {
                self.push_to_media_server(playlist, &paths).await;
            }
        }
        Ok(synced)
    }

    async fn push_to_media_server(&self, playlist: &WatchedPlaylist, paths: &[PathBuf]) {
        let result = within(
            self.settings.external_call_timeout,
            self.collaborators.media.sync_playlist(&playlist.name, paths),
        )
        .await;
        match result {
            Ok(()) => {
                tracing::info!(target: "playlists", playlist = %playlist.id, tracks = paths.len(), "Synced {}", playlist.name);
            }
            Err(e) => {
                tracing::warn!(target: "playlists", playlist = %playlist.id, error = %e, "Media server playlist sync failed");
            }
        }
    }
}

/// File-system safe playlist file stem.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        "playlist".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `path` expressed relative to the directory `base`.
///
/// Both are expected to be absolute (or both relative to the same root).
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    if common == 0 && path.is_absolute() {
        return path.to_path_buf();
    }

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &path_parts[common..] {
        relative.push(part.as_os_str());
    }
    relative
}

/// Extended M3U listing `paths` relative to `dir`.
pub fn render_m3u(dir: &Path, paths: &[PathBuf]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for path in paths {
        out.push_str(&relative_to(path, dir).to_string_lossy());
        out.push('\n');
    }
    out
}

/// Write `<dir>/<sanitized name>.m3u` atomically. Returns the file written.
pub fn write_m3u(dir: &Path, name: &str, paths: &[PathBuf]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(format!("create {}", dir.display()))?;

    let file = dir.join(format!("{}.m3u", sanitize_name(name)));
    let temp = file.with_extension("m3u.tmp");
    std::fs::write(&temp, render_m3u(dir, paths))
        .with_context(format!("write {}", temp.display()))?;
    std::fs::rename(&temp, &file).with_context(format!("rename to {}", file.display()))?;
    Ok(file)
}

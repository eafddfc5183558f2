//! Rewriting a file's tags with canonical metadata.
//!
//! Uses the lofty crate for format-independent metadata access.

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt};
use std::path::Path;

use super::domain::{EnrichmentError, Identification};

/// Overwrite title, artist, album and the MusicBrainz ids of `path`.
///
/// Existing values are replaced unconditionally: the identification is
/// what the library manager will match the file against.
pub fn write_identification(path: &Path, id: &Identification) -> Result<(), EnrichmentError> {
    let mut tagged_file = Probe::open(path)
        .map_err(|e| EnrichmentError::Tags(format!("open {}: {e}", path.display())))?
        .read()
        .map_err(|e| EnrichmentError::Tags(format!("read {}: {e}", path.display())))?;

    // Get the primary tag type for this format, or create one
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| EnrichmentError::Tags("format has no writable tag".into()))?;

    if let Some(title) = &id.title {
        tag.set_title(title.clone());
    }
    if let Some(artist) = &id.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(album) = &id.album {
        tag.set_album(album.clone());
    }
    tag.insert_text(ItemKey::MusicBrainzRecordingId, id.recording_id.clone());
    if let Some(artist_id) = &id.artist_id {
        tag.insert_text(ItemKey::MusicBrainzArtistId, artist_id.clone());
    }
    if let Some(release_group_id) = &id.release_group_id {
        tag.insert_text(ItemKey::MusicBrainzReleaseGroupId, release_group_id.clone());
    }

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| EnrichmentError::Tags(format!("save {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_non_audio_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-audio.flac");
        std::fs::write(&path, b"definitely not a flac stream").unwrap();

        let result = write_identification(&path, &Identification::default());
        assert!(matches!(result, Err(EnrichmentError::Tags(_))));
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let result = write_identification(Path::new("/nonexistent/a.flac"), &Identification::default());
        assert!(matches!(result, Err(EnrichmentError::Tags(msg)) if msg.contains("open")));
    }
}

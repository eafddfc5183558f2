//! Source Watcher: playlist polling and discovery.

use crate::config::WatchedPlaylist;
use crate::db::snapshots::{self, PollOutcome};
use crate::error::Error;
use crate::providers::ProviderError;

use super::{Engine, within};

/// Why a poll produced no result.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The provider could not be reached. Nothing is recorded; the next
    /// scheduled poll tries again.
    #[error("Playlist {playlist_id} unavailable: {source}")]
    SourceUnavailable {
        playlist_id: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Store(#[from] Error),
}

impl Engine {
    /// Poll one playlist and record every item not seen before.
    ///
    /// Entry creation and the snapshot update commit together.
    pub async fn poll(&self, playlist: &WatchedPlaylist) -> Result<PollOutcome, PollError> {
        let items = within(
            self.settings.external_call_timeout,
            self.collaborators.provider.list_items(&playlist.id),
        )
        .await
        .map_err(|source| PollError::SourceUnavailable {
            playlist_id: playlist.id.clone(),
            source,
        })?;

        let outcome =
            snapshots::apply_poll(&self.pool, &playlist.id, &playlist.name, &items, self.clock.now())
                .await?;

        tracing::info!(
            target: "watcher",
            playlist = %playlist.id,
            items = items.len(),
            new = outcome.created.len(),
            removed = outcome.removed.len(),
            "Polled {}",
            playlist.name
        );
        Ok(outcome)
    }

    /// Poll every watched playlist. Returns how many entries were created.
    ///
    /// An unreachable provider is logged and skipped.
    pub async fn poll_all(&self) -> crate::error::Result<usize> {
        let mut created = 0;
        for playlist in &self.settings.playlists {
            match self.poll(playlist).await {
                Ok(outcome) => created += outcome.created.len(),
                Err(PollError::SourceUnavailable { playlist_id, source }) => {
                    tracing::warn!(target: "watcher", playlist = %playlist_id, error = %source, "Playlist provider unavailable");
                }
                Err(PollError::Store(e)) => return Err(e),
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::harness;
    use crate::model::{PlaylistItem, Stage};

    fn road_trip() -> WatchedPlaylist {
        WatchedPlaylist {
            id: "p1".into(),
            name: "Road Trip".into(),
        }
    }

    #[tokio::test]
    async fn test_poll_discovers_new_items_once() {
        let h = harness().await;
        h.provider
            .set("p1", vec![PlaylistItem::new("p1-item", "ArtistX", "TrackY")]);

        let first = h.engine.poll(&road_trip()).await.unwrap();
        assert_eq!(first.created.len(), 1);
        let entry = h.entry(first.created[0]).await;
        assert_eq!(entry.stage, Stage::Discovered);
        assert_eq!(entry.artist, "ArtistX");

        let second = h.engine.poll(&road_trip()).await.unwrap();
        assert!(second.created.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_not_a_removal() {
        let h = harness().await;
        h.provider.set(
            "p1",
            vec![
                PlaylistItem::new("a", "Artist", "A"),
                PlaylistItem::new("b", "Artist", "B"),
            ],
        );
        h.engine.poll(&road_trip()).await.unwrap();

        *h.provider.unreachable.lock() = true;
        let err = h.engine.poll(&road_trip()).await.unwrap_err();
        assert!(matches!(err, PollError::SourceUnavailable { .. }));
        assert_eq!(h.engine.poll_all().await.unwrap(), 0);

        let snapshot = snapshots::load_snapshot(h.engine.pool(), "p1").await.unwrap();
        assert_eq!(snapshot.items, vec!["a".to_string(), "b".to_string()]);

        // Back online with one more item: only that one is new
        *h.provider.unreachable.lock() = false;
        h.provider.set(
            "p1",
            vec![
                PlaylistItem::new("a", "Artist", "A"),
                PlaylistItem::new("b", "Artist", "B"),
                PlaylistItem::new("c", "Artist", "C"),
            ],
        );
        assert_eq!(h.engine.poll_all().await.unwrap(), 1);
    }
}

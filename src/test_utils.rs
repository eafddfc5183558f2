//! Test utilities and fixtures for music-curator tests.
//!
//! This module provides common test helpers, mock factories, and
//! database utilities to reduce boilerplate in tests.
//!
//! # Example
//!
//! ```ignore
//! use music_curator::test_utils::{temp_db, entry_in_stage};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     let clock = ManualClock::new();
//!     let entry = entry_in_stage(&pool, "item-1", Stage::Tagged, &*clock).await;
//!     // ... test logic
//! }
//! ```

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;
use tempfile::TempDir;

use crate::clock::Clock;
use crate::db::entries::{self, Advance};
use crate::model::{PlaylistItem, Stage, TrackEntry};

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically.
///
/// # Returns
///
/// A tuple of (connection pool, temp directory handle).
/// Keep the TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Creates an in-memory TrackEntry with sensible defaults.
///
/// Customize using struct update syntax or by mutating fields.
pub fn mock_entry(stage: Stage) -> TrackEntry {
    let now = Utc::now();
    TrackEntry {
        id: 1,
        playlist_id: "p1".to_string(),
        source_item_id: "spotify:track:test".to_string(),
        artist: "Test Artist".to_string(),
        title: "Test Track".to_string(),
        album: Some("Test Album".to_string()),
        stage,
        failure: None,
        last_error: None,
        note: None,
        retry_count: 0,
        content_hash: None,
        file_path: None,
        library_path: None,
        album_id: None,
        recording_id: None,
        import_request_id: None,
        discovered_at: now,
        last_seen_at: now,
        stage_changed_at: now,
        enqueued_at: None,
        last_attempt_at: None,
        next_attempt_at: None,
        downloaded_at: None,
        import_requested_at: None,
        completed_at: None,
    }
}

/// Inserts a `discovered` entry and returns it.
pub async fn seed_entry(
    pool: &SqlitePool,
    playlist_id: &str,
    item_id: &str,
    now: DateTime<Utc>,
) -> TrackEntry {
    let item = PlaylistItem::new(item_id, "Test Artist", format!("Track {item_id}"))
        .with_album("Test Album");
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let id = entries::insert_discovered(&mut conn, playlist_id, &item, now)
        .await
        .expect("Failed to insert entry")
        .expect("Entry already exists");
    drop(conn);

    entries::get_entry(pool, id)
        .await
        .expect("Failed to load entry")
        .expect("Entry vanished")
}

/// Inserts an entry on playlist `p1` and walks it along the happy path
/// until it reaches `stage`.
///
/// Panics for `Failed`; record failures explicitly in the test instead.
pub async fn entry_in_stage(
    pool: &SqlitePool,
    item_id: &str,
    stage: Stage,
    clock: &dyn Clock,
) -> TrackEntry {
    assert_ne!(stage, Stage::Failed, "walk to the failing stage, then fail it");
    let entry = seed_entry(pool, "p1", item_id, clock.now()).await;
    let id = entry.id;

    if stage == Stage::DuplicateSkipped {
        entries::advance(pool, id, Stage::Discovered, stage, clock.now())
            .await
            .expect("Failed to skip");
        return reload(pool, id).await;
    }

    let path = [
        Stage::Discovered,
        Stage::Queued,
        Stage::Downloading,
        Stage::Downloaded,
        Stage::Identifying,
        Stage::Tagged,
        Stage::ImportRequested,
        Stage::Imported,
        Stage::Verified,
    ];

    for pair in path.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        if from == stage {
            break;
        }
        if to.is_in_flight() {
            entries::claim(pool, id, from, to, clock.now())
                .await
                .expect("Failed to claim")
                .expect("Entry not claimable");
            continue;
        }
        let values = match to {
            Stage::Downloaded => Advance {
                file_path: Some(PathBuf::from(format!("/downloads/{id}/{item_id}.m4a"))),
                content_hash: Some(format!("hash-{item_id}")),
                ..Default::default()
            },
            Stage::Tagged => Advance {
                album_id: Some("A1".to_string()),
                recording_id: Some(format!("rec-{item_id}")),
                ..Default::default()
            },
            Stage::ImportRequested => Advance {
                import_request_id: Some(format!("cmd-{id}")),
                ..Default::default()
            },
            _ => Advance::default(),
        };
        let applied = entries::advance_with(pool, id, from, to, &values, clock.now())
            .await
            .expect("Failed to advance");
        assert!(applied, "{from} -> {to} was stale");
    }

    reload(pool, id).await
}

async fn reload(pool: &SqlitePool, id: i64) -> TrackEntry {
    entries::get_entry(pool, id)
        .await
        .expect("Failed to load entry")
        .expect("Entry vanished")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;

        // Should be able to query
        let all = entries::list_entries(&pool, &Default::default()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_entry_in_stage_walks_happy_path() {
        let (pool, _dir) = temp_db().await;
        let clock = ManualClock::new();

        let entry = entry_in_stage(&pool, "a", Stage::ImportRequested, &*clock).await;
        assert_eq!(entry.stage, Stage::ImportRequested);
        assert_eq!(entry.album_id.as_deref(), Some("A1"));
        assert!(entry.file_path.is_some());
        assert!(entry.import_requested_at.is_some());

        let entry = entry_in_stage(&pool, "b", Stage::Verified, &*clock).await;
        assert!(entry.completed_at.is_some());
    }

    #[test]
    fn test_mock_entry_defaults() {
        let entry = mock_entry(Stage::Queued);
        assert_eq!(entry.stage, Stage::Queued);
        assert!(entry.failure.is_none());
        assert_eq!(entry.display_name(), "Test Artist - Test Track");
    }
}

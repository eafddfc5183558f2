//! Playlist Snapshot persistence.
//!
//! A poll result is applied in one transaction: new Track Entries are
//! inserted and the snapshot is replaced together, so a crash can neither
//! lose a new item nor record it twice.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use super::{entries, parse_opt_ts, ts};
use crate::error::Result;
use crate::model::{PlaylistItem, PlaylistSnapshot};

/// Stored summary of one watched playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub playlist_id: String,
    pub name: Option<String>,
    pub item_count: i64,
    pub polled_at: Option<DateTime<Utc>>,
}

/// Result of applying one poll.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// Ids of Track Entries created by this poll
    pub created: Vec<i64>,
    /// Items that left the playlist since the previous poll
    pub removed: Vec<String>,
}

async fn load_with(conn: &mut SqliteConnection, playlist_id: &str) -> Result<PlaylistSnapshot> {
    let header: Option<(Option<String>, String)> =
        sqlx::query_as("SELECT name, polled_at FROM playlist_snapshots WHERE playlist_id = ?")
            .bind(playlist_id)
            .fetch_optional(&mut *conn)
            .await?;

    let items: Vec<(String,)> = sqlx::query_as(
        "SELECT source_item_id FROM snapshot_items WHERE playlist_id = ? ORDER BY position",
    )
    .bind(playlist_id)
    .fetch_all(&mut *conn)
    .await?;

    let (name, polled_at) = match header {
        Some((name, polled_at)) => (name, parse_opt_ts(Some(&polled_at))?),
        None => (None, None),
    };

    Ok(PlaylistSnapshot {
        playlist_id: playlist_id.to_string(),
        name,
        items: items.into_iter().map(|(id,)| id).collect(),
        polled_at,
    })
}

/// Last stored snapshot of a playlist; empty if it was never polled.
pub async fn load_snapshot(pool: &SqlitePool, playlist_id: &str) -> Result<PlaylistSnapshot> {
    let mut conn = pool.acquire().await?;
    load_with(&mut conn, playlist_id).await
}

/// Record a successful poll.
///
/// Inserts a `discovered` entry for every item absent from the previous
/// snapshot, refreshes `last_seen_at` for every current item and replaces the
/// snapshot, all in one transaction.
pub async fn apply_poll(
    pool: &SqlitePool,
    playlist_id: &str,
    name: &str,
    items: &[PlaylistItem],
    now: DateTime<Utc>,
) -> Result<PollOutcome> {
    // Take the write lock up front; a deferred transaction that reads and
    // then writes cannot wait out a concurrent writer.
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let previous = load_with(&mut tx, playlist_id).await?;
    let mut outcome = PollOutcome {
        removed: previous.removed(items),
        ..Default::default()
    };

    for item in previous.added(items) {
        if let Some(id) = entries::insert_discovered(&mut tx, playlist_id, item, now).await? {
            outcome.created.push(id);
        }
    }

    // Includes items that come back after a removal; their entry already
    // exists, so nothing was inserted for them above.
    let current: Vec<String> = items.iter().map(|i| i.item_id.clone()).collect();
    entries::mark_seen(&mut tx, playlist_id, &current, now).await?;

    sqlx::query("DELETE FROM snapshot_items WHERE playlist_id = ?")
        .bind(playlist_id)
        .execute(&mut *tx)
        .await?;

    let mut position = 0i64;
    let mut seen = std::collections::HashSet::new();
    for item in items.iter().filter(|i| seen.insert(i.item_id.as_str())) {
        sqlx::query(
            "INSERT INTO snapshot_items (playlist_id, source_item_id, position) VALUES (?, ?, ?)",
        )
        .bind(playlist_id)
        .bind(&item.item_id)
        .bind(position)
        .execute(&mut *tx)
        .await?;
        position += 1;
    }

    sqlx::query(
        r#"
        INSERT INTO playlist_snapshots (playlist_id, name, item_count, polled_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(playlist_id) DO UPDATE SET
            name = excluded.name,
            item_count = excluded.item_count,
            polled_at = excluded.polled_at
        "#,
    )
    .bind(playlist_id)
    .bind(name)
    .bind(position)
    .bind(ts(now))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

/// Every stored snapshot, by playlist id.
pub async fn list_snapshots(pool: &SqlitePool) -> Result<Vec<SnapshotSummary>> {
    let rows: Vec<(String, Option<String>, i64, String)> = sqlx::query_as(
        "SELECT playlist_id, name, item_count, polled_at FROM playlist_snapshots ORDER BY playlist_id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(playlist_id, name, item_count, polled_at)| {
            Ok(SnapshotSummary {
                playlist_id,
                name,
                item_count,
                polled_at: parse_opt_ts(Some(&polled_at))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::db::entries::{EntryFilter, list_entries};
    use crate::test_utils::temp_db;

    fn items(ids: &[&str]) -> Vec<PlaylistItem> {
        ids.iter()
            .map(|id| PlaylistItem::new(*id, "Artist", format!("Title {id}")))
            .collect()
    }

    #[tokio::test]
    async fn test_first_poll_discovers_everything() {
        let (pool, _dir) = temp_db().await;
        let clock = ManualClock::new();

        let outcome = apply_poll(&pool, "p1", "Mix", &items(&["a", "b"]), clock.now())
            .await
            .unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert!(outcome.removed.is_empty());

        let snapshot = load_snapshot(&pool, "p1").await.unwrap();
        assert_eq!(snapshot.items, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(snapshot.name.as_deref(), Some("Mix"));
        assert_eq!(snapshot.polled_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_repeat_poll_is_idempotent() {
        let (pool, _dir) = temp_db().await;
        let clock = ManualClock::new();
        apply_poll(&pool, "p1", "Mix", &items(&["a", "b"]), clock.now()).await.unwrap();

        let outcome = apply_poll(&pool, "p1", "Mix", &items(&["a", "b"]), clock.now())
            .await
            .unwrap();
        assert!(outcome.created.is_empty());
        assert_eq!(list_entries(&pool, &EntryFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_removed_then_readded_item_is_not_duplicated() {
        let (pool, _dir) = temp_db().await;
        let clock = ManualClock::new();
        apply_poll(&pool, "p1", "Mix", &items(&["a", "b"]), clock.now()).await.unwrap();

        let outcome = apply_poll(&pool, "p1", "Mix", &items(&["b"]), clock.now()).await.unwrap();
        assert_eq!(outcome.removed, vec!["a".to_string()]);

        let outcome = apply_poll(&pool, "p1", "Mix", &items(&["b", "a", "c"]), clock.now())
            .await
            .unwrap();
        // "a" is new to the snapshot but already has an entry.
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(list_entries(&pool, &EntryFilter::default()).await.unwrap().len(), 3);
        assert_eq!(
            load_snapshot(&pool, "p1").await.unwrap().items,
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }

    #[tokio::test]
    async fn test_readded_item_is_seen_again() {
        let (pool, _dir) = temp_db().await;
        let clock = ManualClock::new();
        apply_poll(&pool, "p1", "Mix", &items(&["a"]), clock.now()).await.unwrap();
        apply_poll(&pool, "p1", "Mix", &items(&[]), clock.now()).await.unwrap();

        clock.advance(std::time::Duration::from_secs(3600));
        apply_poll(&pool, "p1", "Mix", &items(&["a"]), clock.now()).await.unwrap();

        let all = list_entries(&pool, &EntryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].last_seen_at, clock.now());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_poll_survives_concurrent_writers() {
        let (pool, _dir) = temp_db().await;
        let clock = ManualClock::new();
        let now = clock.now();

        let mut writers = tokio::task::JoinSet::new();
        for worker in 0..4 {
            let pool = pool.clone();
            writers.spawn(async move {
                for n in 0..30 {
                    let item = PlaylistItem::new(format!("m-{worker}-{n}"), "Artist", "Manual");
                    entries::add_manual(&pool, &item, now).await?;
                    entries::claim_next_queued(&pool, now).await?;
                }
                Ok::<_, crate::error::Error>(())
            });
        }

        for round in 0..30 {
            let ids: Vec<String> = (0..=round % 5).map(|i| format!("p-{i}")).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            apply_poll(&pool, "p1", "Mix", &items(&refs), now)
                .await
                .unwrap_or_else(|e| panic!("poll {round} failed: {e}"));
        }
        while let Some(result) = writers.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(load_snapshot(&pool, "p1").await.unwrap().items.len(), 5);
    }

    #[tokio::test]
    async fn test_list_snapshots() {
        let (pool, _dir) = temp_db().await;
        let clock = ManualClock::new();
        apply_poll(&pool, "p2", "Second", &items(&["x"]), clock.now()).await.unwrap();
        apply_poll(&pool, "p1", "First", &items(&["a", "a", "b"]), clock.now()).await.unwrap();

        let summaries = list_snapshots(&pool).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].playlist_id, "p1");
        assert_eq!(summaries[0].item_count, 2);
        assert_eq!(summaries[1].name.as_deref(), Some("Second"));
    }

    #[tokio::test]
    async fn test_unknown_playlist_has_empty_snapshot() {
        let (pool, _dir) = temp_db().await;
        let snapshot = load_snapshot(&pool, "never").await.unwrap();
        assert!(snapshot.items.is_empty());
        assert!(snapshot.polled_at.is_none());
    }
}

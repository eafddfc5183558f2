//! Track Entry persistence and the atomic stage transitions.
//!
//! Every mutation that changes `stage` carries the stage the caller believes
//! the entry is in. A `false` / `None` result means the entry moved (or was
//! removed) in the meantime and the caller's result is stale.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::QueryBuilder;
use std::path::PathBuf;

use super::{parse_opt_ts, parse_ts, ts};
use crate::error::{Error, Result};
use crate::model::{
    Failure, FailureKind, MANUAL_PLAYLIST_ID, PlaylistItem, Stage, TrackEntry,
};

// ============================================================================
// Database Row Types
// ============================================================================

/// Database row for track_entries table.
#[derive(Debug, sqlx::FromRow)]
struct TrackEntryRow {
    id: i64,
    playlist_id: String,
    source_item_id: String,
    artist: String,
    title: String,
    album: Option<String>,
    stage: String,
    failure_kind: Option<String>,
    failed_from: Option<String>,
    retryable: bool,
    last_error: Option<String>,
    note: Option<String>,
    retry_count: i64,
    content_hash: Option<String>,
    file_path: Option<String>,
    library_path: Option<String>,
    album_id: Option<String>,
    recording_id: Option<String>,
    import_request_id: Option<String>,
    discovered_at: String,
    last_seen_at: String,
    stage_changed_at: String,
    enqueued_at: Option<String>,
    last_attempt_at: Option<String>,
    next_attempt_at: Option<String>,
    downloaded_at: Option<String>,
    import_requested_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<TrackEntryRow> for TrackEntry {
    type Error = Error;

    fn try_from(row: TrackEntryRow) -> Result<Self> {
        let stage: Stage = row
            .stage
            .parse()
            .map_err(|e| Error::corrupt(format!("entry {}: {e}", row.id)))?;

        let failure = match (stage, row.failure_kind, row.failed_from) {
            (Stage::Failed, Some(kind), Some(from)) => Some(Failure {
                kind: kind.parse().map_err(Error::corrupt)?,
                failed_from: from
                    .parse()
                    .map_err(|e| Error::corrupt(format!("entry {}: {e}", row.id)))?,
                retryable: row.retryable,
            }),
            (Stage::Failed, _, _) => {
                return Err(Error::corrupt(format!(
                    "entry {} is failed without a failure kind",
                    row.id
                )));
            }
            _ => None,
        };

        Ok(TrackEntry {
            id: row.id,
            playlist_id: row.playlist_id,
            source_item_id: row.source_item_id,
            artist: row.artist,
            title: row.title,
            album: row.album,
            stage,
            failure,
            last_error: row.last_error,
            note: row.note,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            content_hash: row.content_hash,
            file_path: row.file_path.map(PathBuf::from),
            library_path: row.library_path.map(PathBuf::from),
            album_id: row.album_id,
            recording_id: row.recording_id,
            import_request_id: row.import_request_id,
            discovered_at: parse_ts(&row.discovered_at)?,
            last_seen_at: parse_ts(&row.last_seen_at)?,
            stage_changed_at: parse_ts(&row.stage_changed_at)?,
            enqueued_at: parse_opt_ts(row.enqueued_at.as_deref())?,
            last_attempt_at: parse_opt_ts(row.last_attempt_at.as_deref())?,
            next_attempt_at: parse_opt_ts(row.next_attempt_at.as_deref())?,
            downloaded_at: parse_opt_ts(row.downloaded_at.as_deref())?,
            import_requested_at: parse_opt_ts(row.import_requested_at.as_deref())?,
            completed_at: parse_opt_ts(row.completed_at.as_deref())?,
        })
    }
}

fn decode_all(rows: Vec<TrackEntryRow>) -> Result<Vec<TrackEntry>> {
    rows.into_iter().map(TrackEntry::try_from).collect()
}

fn decode_opt(row: Option<TrackEntryRow>) -> Result<Option<TrackEntry>> {
    row.map(TrackEntry::try_from).transpose()
}

// ============================================================================
// Discovery
// ============================================================================

/// Record a newly seen playlist item in stage `discovered`.
///
/// Idempotent on `(playlist_id, item_id)`: returns the new entry id, or
/// `None` if the pair is already tracked.
pub async fn insert_discovered(
    conn: &mut SqliteConnection,
    playlist_id: &str,
    item: &PlaylistItem,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let now = ts(now);
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO track_entries (
            playlist_id, source_item_id, artist, title, album, stage,
            discovered_at, last_seen_at, stage_changed_at
        )
        VALUES (?, ?, ?, ?, ?, 'discovered', ?, ?, ?)
        ON CONFLICT(playlist_id, source_item_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(playlist_id)
    .bind(&item.item_id)
    .bind(&item.artist)
    .bind(&item.title)
    .bind(&item.album)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|r| r.0))
}

/// Refresh `last_seen_at` for items still present on a playlist.
pub async fn mark_seen(
    conn: &mut SqliteConnection,
    playlist_id: &str,
    item_ids: &[String],
    now: DateTime<Utc>,
) -> Result<()> {
    let now = ts(now);
    for item_id in item_ids {
        sqlx::query(
            "UPDATE track_entries SET last_seen_at = ? WHERE playlist_id = ? AND source_item_id = ?",
        )
        .bind(&now)
        .bind(playlist_id)
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Record an operator-supplied track under the `manual` pseudo playlist.
///
/// Returns `None` if the same item was already added by hand.
pub async fn add_manual(
    pool: &SqlitePool,
    item: &PlaylistItem,
    now: DateTime<Utc>,
) -> Result<Option<TrackEntry>> {
    let mut conn = pool.acquire().await?;
    match insert_discovered(&mut conn, MANUAL_PLAYLIST_ID, item, now).await? {
        Some(id) => get_entry(pool, id).await,
        None => Ok(None),
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Filter for [`list_entries`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub stage: Option<Stage>,
    /// Substring matched against artist, title and album
    pub query: Option<String>,
    pub playlist_id: Option<String>,
    pub limit: Option<u32>,
}

/// Get a single entry by id.
pub async fn get_entry(pool: &SqlitePool, id: i64) -> Result<Option<TrackEntry>> {
    let row: Option<TrackEntryRow> = sqlx::query_as("SELECT * FROM track_entries WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    decode_opt(row)
}

/// List entries matching a filter, oldest first.
pub async fn list_entries(pool: &SqlitePool, filter: &EntryFilter) -> Result<Vec<TrackEntry>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM track_entries WHERE 1 = 1");
    if let Some(stage) = filter.stage {
        qb.push(" AND stage = ").push_bind(stage.as_str());
    }
    if let Some(playlist_id) = &filter.playlist_id {
        qb.push(" AND playlist_id = ").push_bind(playlist_id.clone());
    }
    if let Some(query) = filter.query.as_deref().filter(|q| !q.is_empty()) {
        let pattern = format!("%{query}%");
        qb.push(" AND (artist LIKE ")
            .push_bind(pattern.clone())
            .push(" OR title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR album LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    qb.push(" ORDER BY id");
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(i64::from(limit));
    }

    let rows: Vec<TrackEntryRow> = qb.build_query_as().fetch_all(pool).await?;
    decode_all(rows)
}

/// All entries currently in `stage`, longest-waiting first.
pub async fn entries_in_stage(pool: &SqlitePool, stage: Stage) -> Result<Vec<TrackEntry>> {
    let rows: Vec<TrackEntryRow> = sqlx::query_as(
        "SELECT * FROM track_entries WHERE stage = ? ORDER BY stage_changed_at, id",
    )
    .bind(stage.as_str())
    .fetch_all(pool)
    .await?;
    decode_all(rows)
}

/// Another entry for the same source item that is already being handled.
///
/// "Being handled" means past precheck and not skipped or finally failed.
pub async fn find_active_duplicate(
    pool: &SqlitePool,
    entry_id: i64,
    source_item_id: &str,
) -> Result<Option<TrackEntry>> {
    let row: Option<TrackEntryRow> = sqlx::query_as(
        r#"
        SELECT * FROM track_entries
        WHERE source_item_id = ?
          AND id != ?
          AND stage NOT IN ('discovered', 'duplicate_skipped')
          AND NOT (stage = 'failed' AND retryable = 0)
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(source_item_id)
    .bind(entry_id)
    .fetch_optional(pool)
    .await?;
    decode_opt(row)
}

/// Number of entries per stage, in lifecycle order.
pub async fn stage_counts(pool: &SqlitePool) -> Result<Vec<(Stage, i64)>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT stage, COUNT(*) FROM track_entries GROUP BY stage")
            .fetch_all(pool)
            .await?;

    let mut counts = rows
        .into_iter()
        .map(|(stage, count)| {
            stage
                .parse::<Stage>()
                .map(|s| (s, count))
                .map_err(|e| Error::corrupt(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    counts.sort_by_key(|(stage, _)| *stage);
    Ok(counts)
}

/// Number of successful downloads since `since`.
pub async fn downloads_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<u32> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM track_entries WHERE downloaded_at >= ?")
            .bind(ts(since))
            .fetch_one(pool)
            .await?;
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

/// Files of verified entries on a playlist, in playlist order.
///
/// The library copy is preferred over the staging file. An item skipped here because another playlist already tracks it uses
/// that entry's file.
pub async fn verified_paths(pool: &SqlitePool, playlist_id: &str) -> Result<Vec<PathBuf>> {
    let rows: Vec<(Option<String>,)> = sqlx::query_as(
        r#"
        SELECT (
            SELECT COALESCE(e.library_path, e.file_path) FROM track_entries e
            WHERE e.source_item_id = s.source_item_id
              AND e.stage = 'verified'
              AND COALESCE(e.library_path, e.file_path) IS NOT NULL
            ORDER BY e.playlist_id != ?1, e.id
            LIMIT 1
        )
        FROM snapshot_items s
        WHERE s.playlist_id = ?1
        ORDER BY s.position
        "#,
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(p,)| p.map(PathBuf::from))
        .collect())
}

// ============================================================================
// Transitions
// ============================================================================

/// Values recorded alongside a forward stage change.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct Advance {
    pub file_path: Option<PathBuf>,
    pub library_path: Option<PathBuf>,
    pub content_hash: Option<String>,
    pub album_id: Option<String>,
    pub recording_id: Option<String>,
    pub import_request_id: Option<String>,
    pub note: Option<String>,
}

/// Whether reaching `stage` completes an operation, which clears the
/// consecutive-failure counter.
fn completes_operation(stage: Stage) -> bool {
    matches!(
        stage,
        Stage::Downloaded
            | Stage::Tagged
            | Stage::Imported
            | Stage::Verified
            | Stage::DuplicateSkipped
    )
}

/// Move an entry along a forward edge.
///
/// Returns `false` if the entry is no longer in `from`.
pub async fn advance(
    pool: &SqlitePool,
    id: i64,
    from: Stage,
    to: Stage,
    now: DateTime<Utc>,
) -> Result<bool> {
    advance_with(pool, id, from, to, &Advance::default(), now).await
}

/// Move an entry along a forward edge, recording the operation's results.
///
/// Returns `false` if the entry is no longer in `from`.
pub async fn advance_with(
    pool: &SqlitePool,
    id: i64,
    from: Stage,
    to: Stage,
    values: &Advance,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !from.can_advance_to(to) {
        return Err(Error::InvalidTransition { from, to });
    }
    let now = ts(now);
    let at = |stage: Stage| (to == stage).then(|| now.clone());

    let result = sqlx::query(
        r#"
        UPDATE track_entries SET
            stage = ?,
            stage_changed_at = ?,
            retry_count = CASE WHEN ? THEN 0 ELSE retry_count END,
            next_attempt_at = NULL,
            file_path = COALESCE(?, file_path),
            library_path = COALESCE(?, library_path),
            content_hash = COALESCE(?, content_hash),
            album_id = COALESCE(?, album_id),
            recording_id = COALESCE(?, recording_id),
            import_request_id = COALESCE(?, import_request_id),
            note = COALESCE(?, note),
            enqueued_at = COALESCE(?, enqueued_at),
            downloaded_at = COALESCE(?, downloaded_at),
            import_requested_at = COALESCE(?, import_requested_at),
            completed_at = COALESCE(?, completed_at)
        WHERE id = ? AND stage = ?
        "#,
    )
    .bind(to.as_str())
    .bind(&now)
    .bind(completes_operation(to))
    .bind(values.file_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
    .bind(values.library_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
    .bind(&values.content_hash)
    .bind(&values.album_id)
    .bind(&values.recording_id)
    .bind(&values.import_request_id)
    .bind(&values.note)
    .bind(at(Stage::Queued))
    .bind(at(Stage::Downloaded))
    .bind(at(Stage::ImportRequested))
    .bind(to.is_terminal().then(|| now.clone()))
    .bind(id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record where the library filed an entry's track.
///
/// Returns `false` if the entry is no longer in `stage`.
pub async fn set_library_path(
    pool: &SqlitePool,
    id: i64,
    stage: Stage,
    path: &std::path::Path,
) -> Result<bool> {
    let result = sqlx::query("UPDATE track_entries SET library_path = ? WHERE id = ? AND stage = ?")
        .bind(path.to_string_lossy().into_owned())
        .bind(id)
        .bind(stage.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Take the oldest queued entry and mark it `downloading`.
///
/// Selection and update are one statement, so two workers can never
/// claim the same entry.
pub async fn claim_next_queued(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Option<TrackEntry>> {
    let now = ts(now);
    let row: Option<TrackEntryRow> = sqlx::query_as(
        r#"
        UPDATE track_entries
        SET stage = 'downloading', stage_changed_at = ?, last_attempt_at = ?
        WHERE id = (
            SELECT id FROM track_entries
            WHERE stage = 'queued'
            ORDER BY enqueued_at, id
            LIMIT 1
        )
        AND stage = 'queued'
        RETURNING *
        "#,
    )
    .bind(&now)
    .bind(&now)
    .fetch_optional(pool)
    .await?;
    decode_opt(row)
}

/// Move a specific entry into an in-flight stage, returning its fresh state.
///
/// Returns `None` if the entry is no longer in `from`.
pub async fn claim(
    pool: &SqlitePool,
    id: i64,
    from: Stage,
    to: Stage,
    now: DateTime<Utc>,
) -> Result<Option<TrackEntry>> {
    if !from.can_advance_to(to) || !to.is_in_flight() {
        return Err(Error::InvalidTransition { from, to });
    }
    let now = ts(now);
    let row: Option<TrackEntryRow> = sqlx::query_as(
        r#"
        UPDATE track_entries
        SET stage = ?, stage_changed_at = ?, last_attempt_at = ?
        WHERE id = ? AND stage = ?
        RETURNING *
        "#,
    )
    .bind(to.as_str())
    .bind(&now)
    .bind(&now)
    .bind(id)
    .bind(from.as_str())
    .fetch_optional(pool)
    .await?;
    decode_opt(row)
}

/// A classified failure about to be recorded.
#[derive(Debug, Clone)]
pub struct FailureUpdate {
    pub kind: FailureKind,
    /// Already reflects retry caps
    pub retryable: bool,
    pub message: String,
    /// Consecutive failures including this one
    pub retry_count: u32,
    /// Backoff floor; `None` for terminal failures
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Move an entry from `from` to `failed`.
///
/// Returns `false` if the entry is no longer in `from` (e.g. it was
/// cancelled while the failing call was running).
pub async fn fail(
    pool: &SqlitePool,
    id: i64,
    from: Stage,
    failure: &FailureUpdate,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !from.can_transition_to(Stage::Failed) {
        return Err(Error::InvalidTransition {
            from,
            to: Stage::Failed,
        });
    }
    let now = ts(now);

    let result = sqlx::query(
        r#"
        UPDATE track_entries SET
            stage = 'failed',
            stage_changed_at = ?,
            failure_kind = ?,
            failed_from = ?,
            retryable = ?,
            last_error = ?,
            retry_count = ?,
            next_attempt_at = ?,
            completed_at = ?
        WHERE id = ? AND stage = ?
        "#,
    )
    .bind(&now)
    .bind(failure.kind.as_str())
    .bind(from.as_str())
    .bind(failure.retryable)
    .bind(&failure.message)
    .bind(i64::from(failure.retry_count))
    .bind(failure.next_attempt_at.map(ts))
    .bind((!failure.retryable).then(|| now.clone()))
    .bind(id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Operator cancel: any non-terminal entry becomes `failed(cancelled, final)`.
///
/// An in-flight worker notices on its next transition, which no longer
/// matches, and drops its result.
pub async fn cancel(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let now = ts(now);
    let result = sqlx::query(
        r#"
        UPDATE track_entries SET
            failed_from = CASE WHEN stage = 'failed' THEN failed_from ELSE stage END,
            stage = 'failed',
            failure_kind = ?,
            retryable = 0,
            last_error = 'cancelled by operator',
            next_attempt_at = NULL,
            stage_changed_at = ?,
            completed_at = ?
        WHERE id = ?
          AND stage NOT IN ('verified', 'duplicate_skipped')
          AND NOT (stage = 'failed' AND retryable = 0)
        "#,
    )
    .bind(FailureKind::Cancelled.as_str())
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Return an entry from `failed` to the stage its operation restarts at.
async fn reopen(
    pool: &SqlitePool,
    entry: &TrackEntry,
    reset_attempts: bool,
    now: DateTime<Utc>,
) -> Result<bool> {
    let target = entry.retry_target();
    let now = ts(now);
    let result = sqlx::query(
        r#"
        UPDATE track_entries SET
            stage = ?,
            stage_changed_at = ?,
            failure_kind = NULL,
            failed_from = NULL,
            retryable = 0,
            next_attempt_at = NULL,
            completed_at = NULL,
            retry_count = CASE WHEN ? THEN 0 ELSE retry_count END,
            enqueued_at = COALESCE(?, enqueued_at)
        WHERE id = ? AND stage = 'failed'
        "#,
    )
    .bind(target.as_str())
    .bind(&now)
    .bind(reset_attempts)
    .bind((target == Stage::Queued).then(|| now.clone()))
    .bind(entry.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Resume every retryable failure whose backoff floor has passed.
///
/// A resumed download goes to the back of the queue. Returns the resumed
/// entries with the stage each went back to.
pub async fn resume_due(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<(TrackEntry, Stage)>> {
    let rows: Vec<TrackEntryRow> = sqlx::query_as(
        r#"
        SELECT * FROM track_entries
        WHERE stage = 'failed'
          AND retryable = 1
          AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
        ORDER BY next_attempt_at, id
        "#,
    )
    .bind(ts(now))
    .fetch_all(pool)
    .await?;

    let mut resumed = Vec::new();
    for entry in decode_all(rows)? {
        if reopen(pool, &entry, false, now).await? {
            let target = entry.retry_target();
            resumed.push((entry, target));
        }
    }
    Ok(resumed)
}

/// Operator retry: failed entries (all, or just `id`) go back to their
/// retry target with a clean attempt counter, retryable or not.
///
/// Returns the number of entries reopened.
pub async fn retry_failed(pool: &SqlitePool, id: Option<i64>, now: DateTime<Utc>) -> Result<u64> {
    let candidates: Vec<TrackEntry> = match id {
        Some(id) => get_entry(pool, id).await?.into_iter().collect(),
        None => entries_in_stage(pool, Stage::Failed).await?,
    };

    let mut reopened = 0;
    for entry in candidates.iter().filter(|e| e.stage == Stage::Failed) {
        if reopen(pool, entry, true, now).await? {
            reopened += 1;
        }
    }
    Ok(reopened)
}

/// Physically delete an entry. Returns whether it existed.
pub async fn remove(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM track_entries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Reset entries left in-flight by a previous process.
///
/// Returns how many entries were reset.
pub async fn recover_interrupted(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let now = ts(now);
    let mut recovered = 0;
    for from in [Stage::Downloading, Stage::Identifying] {
        let Some(to) = from.recovery_target() else {
            continue;
        };
        let result =
            sqlx::query("UPDATE track_entries SET stage = ?, stage_changed_at = ? WHERE stage = ?")
                .bind(to.as_str())
                .bind(&now)
                .bind(from.as_str())
                .execute(pool)
                .await?;
        recovered += result.rows_affected();
    }
    Ok(recovered)
}

// ============================================================================
// Tests
// ============================================================================

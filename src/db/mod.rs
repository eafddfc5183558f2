//! State Store: durable record of every Track Entry and Playlist Snapshot.
//!
//! Uses SQLx with SQLite. The store is the only shared mutable resource of
//! the engine, so every stage change is a single conditional statement
//! keyed by entry id *and* the expected current stage:
//!
//! ```sql
//! UPDATE track_entries SET stage = ?, ... WHERE id = ? AND stage = ?
//! ```
//!
//! Zero affected rows means somebody else (another worker, an operator
//! cancel or remove) got there first; the caller discards its result.
//!
//! # Example
//!
//! ```ignore
//! use music_curator::db::{init_db, entries};
//!
//! let pool = init_db("sqlite:music_curator.db").await?;
//! let next = entries::claim_next_queued(&pool, clock.now()).await?;
//! ```

pub mod entries;
pub mod snapshots;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "music_curator.db";

/// How long a statement waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 WAL-mode connections, and runs all pending migrations.
/// Writers queue on each other for up to [`BUSY_TIMEOUT`].
///
/// # Errors
///
/// Returns an error if:
/// - Database creation fails
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let options = SqliteConnectOptions::from_str(db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(sqlx::Error::from)?;

    Ok(pool)
}

/// Storage form of a timestamp.
///
/// Fixed width with millisecond precision and a `Z` suffix, so that SQL
/// string comparison orders timestamps chronologically.
pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::corrupt(format!("bad timestamp '{raw}': {e}")))
}

/// Parse an optional stored timestamp.
pub fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

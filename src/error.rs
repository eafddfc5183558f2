//! Application-wide error types.
//!
//! Library modules use specific error types via `thiserror`, while the
//! CLI and `main` use `anyhow` for convenient propagation.
//!
//! # Design
//!
//! - [`Error`]: errors that stop an orchestration pass. Everything an
//!   external collaborator can throw is classified at the component
//!   boundary into a [`FailureKind`](crate::model::FailureKind) and recorded
//!   on the Track Entry instead, so in practice only State Store problems
//!   surface here.
//! - Collaborator errors live in [`crate::providers`].
//! - Configuration errors live in [`crate::config::ConfigError`].

use crate::model::Stage;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State Store error. Fatal to the scheduler.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded (unknown stage, bad timestamp...)
    #[error("Corrupt state store row: {0}")]
    Corrupt(String),

    /// A caller asked for an edge that is not part of the lifecycle graph
    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a corrupt-row error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error means durable state can no longer be trusted.
    ///
    /// The scheduler stops the whole process when a pass returns one of these.
    /// Lock contention is not fatal: the pass is simply run again.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Database(_) if self.is_contention() => false,
            Error::Database(_) | Error::Corrupt(_) => true,
            Error::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// SQLite was busy or locked by another writer, or no connection was free.
    pub fn is_contention(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            Error::Database(sqlx::Error::Database(db)) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                // Extended codes keep the primary code in the low byte
                .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
            Error::WithContext { source, .. } => source.is_contention(),
            _ => false,
        }
    }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidTransition {
            from: Stage::Discovered,
            to: Stage::Tagged,
        };
        let msg = err.to_string();
        assert!(msg.contains("discovered"));
        assert!(msg.contains("tagged"));
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::corrupt("stage 'bogus'").context("while loading entry 7");
        let msg = err.to_string();
        assert!(msg.contains("while loading entry 7"));
        assert!(msg.contains("bogus"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::corrupt("x").is_fatal());
        assert!(Error::Database(sqlx::Error::RowNotFound).is_fatal());
        assert!(Error::Database(sqlx::Error::RowNotFound).context("ctx").is_fatal());
        assert!(!Error::Io(std::io::Error::other("disk")).is_fatal());
    }

    #[test]
    fn test_pool_timeout_is_not_fatal() {
        let err = Error::Database(sqlx::Error::PoolTimedOut).context("claiming");
        assert!(err.is_contention());
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_busy_database_is_not_fatal() {
        let (pool, _dir) = crate::test_utils::temp_db().await;
        let mut holder = pool.acquire().await.unwrap();
        let mut waiter = pool.acquire().await.unwrap();
        sqlx::query("PRAGMA busy_timeout = 0")
            .execute(&mut *waiter)
            .await
            .unwrap();

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *holder).await.unwrap();
        let err = Error::Database(
            sqlx::query("BEGIN IMMEDIATE")
                .execute(&mut *waiter)
                .await
                .unwrap_err(),
        );
        sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();

        assert!(err.is_contention(), "{err}");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(Error::corrupt("test"));
        let with_ctx = result.with_context("additional context");
        assert!(with_ctx.unwrap_err().to_string().contains("additional context"));
    }
}

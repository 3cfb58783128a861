//! Error types for the `SQLite` store.

use taskhub_core::{QueryError, StoreError};
use thiserror::Error;

/// Errors raised by database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON (metadata column) error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The blocking worker panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<DbError> for QueryError {
    fn from(err: DbError) -> Self {
        QueryError::Backend(err.to_string())
    }
}

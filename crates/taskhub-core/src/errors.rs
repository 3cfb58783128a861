//! Error types shared across crates.

use std::time::Duration;

/// Failure of a persistence collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend failed (connection, SQL, pool).
    #[error("store backend error: {0}")]
    Backend(String),
    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Failure of the task-query collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// The backend failed.
    #[error("task query failed: {0}")]
    Backend(String),
    /// The query did not complete in time.
    #[error("task query timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of one delivery attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// The channel is temporarily unavailable.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    /// The attempt exceeded its timeout.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    /// The remote side answered with an error status.
    #[error("{channel} rejected delivery with status {status}")]
    Rejected {
        /// Channel name.
        channel: String,
        /// HTTP-like status code.
        status: u16,
    },
    /// A persistence side effect failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The channel has been shut down.
    #[error("channel closed: {0}")]
    Closed(String),
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl DeliveryError {
    /// Whether another attempt may succeed.
    ///
    /// Rejections are retryable only for server errors and rate limiting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) | Self::Store(_) | Self::Other(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Closed(_) => false,
        }
    }
}

//! Error types for the notification components.

use thiserror::Error;

/// Connection hub errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub no longer accepts registrations.
    #[error("connection hub is shutting down")]
    ShuttingDown,
}

/// Message broker errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker was closed.
    #[error("message broker is closed")]
    Closed,
    /// The message could not be encoded.
    #[error("failed to encode broker message: {0}")]
    Encode(String),
}

/// Due-date scheduler lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// `start` was called on a running scheduler.
    #[error("due scheduler already started")]
    AlreadyStarted,
    /// `stop` was called on a scheduler that is not running.
    #[error("due scheduler is not running")]
    NotRunning,
    /// The loop task panicked.
    #[error("due scheduler loop failed: {0}")]
    Join(String),
}

/// Errors building notification components.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
    /// A configured value is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(HubError::ShuttingDown.to_string(), "connection hub is shutting down");
        assert_eq!(BrokerError::Closed.to_string(), "message broker is closed");
        assert_eq!(
            SchedulerError::AlreadyStarted.to_string(),
            "due scheduler already started"
        );
        assert_eq!(
            NotifyError::Config("webhook url missing".into()).to_string(),
            "invalid configuration: webhook url missing"
        );
    }
}

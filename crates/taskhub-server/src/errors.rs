//! Server setup errors.

use taskhub_notify::{BrokerError, NotifyError, SchedulerError};
use taskhub_store::DbError;
use thiserror::Error;

/// Failure while wiring or starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("http server error: {0}")]
    Serve(#[from] std::io::Error),

    /// Prometheus recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),

    /// Storage setup failed.
    #[error(transparent)]
    Store(#[from] DbError),

    /// A delivery channel was misconfigured.
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// Broker refused a subscription.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Scheduler could not be started.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ServerError>;

//! Process-wide stop signal and bounded drain.
//!
//! Every long-lived component (listener, due scheduler, hub) hangs off
//! one [`CancellationToken`]; the coordinator cancels it once and then
//! waits, up to its grace period, for the drain tasks it is handed.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period when none is configured.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Owns the shared stop token and the drain deadline.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with [`DEFAULT_DRAIN_GRACE`].
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_DRAIN_GRACE)
    }

    /// Coordinator that gives drain tasks `grace` to finish.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Clone of the stop token for a component to watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Configured drain deadline.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Whether the stop signal has gone out.
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the stop signal, then wait for `drains` within the grace period.
    ///
    /// Returns `false` when the deadline passed with drains still running;
    /// those tasks are left detached.
    pub async fn stop(&self, drains: Vec<JoinHandle<()>>) -> bool {
        self.token.cancel();
        info!(
            drains = drains.len(),
            grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
            "stop signalled, draining"
        );

        match tokio::time::timeout(self.grace, futures::future::join_all(drains)).await {
            Ok(results) => {
                for err in results.into_iter().filter_map(Result::err) {
                    warn!(error = %err, "drain task failed");
                }
                true
            }
            Err(_) => {
                warn!(grace = ?self.grace, "drain deadline passed, exiting anyway");
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

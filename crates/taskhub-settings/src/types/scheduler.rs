//! Due-notification scheduler settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Due-date scanner settings.
///
/// This is the only place the due-soon window and overdue grace are
/// configured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Run the scanner at all.
    pub enabled: bool,
    /// Time between scans, in milliseconds.
    pub tick_interval_ms: u64,
    /// How far ahead a due date counts as "due soon", in milliseconds.
    pub due_soon_window_ms: u64,
    /// How long past the due date before a task counts as overdue, in
    /// milliseconds.
    pub overdue_grace_ms: u64,
    /// Bound on one task query, in milliseconds.
    pub query_timeout_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 60_000,
            due_soon_window_ms: 3_600_000,
            overdue_grace_ms: 0,
            query_timeout_ms: 10_000,
        }
    }
}

impl SchedulerSettings {
    /// Scan interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Due-soon window.
    pub fn due_soon_window(&self) -> Duration {
        Duration::from_millis(self.due_soon_window_ms)
    }

    /// Overdue grace.
    pub fn overdue_grace(&self) -> Duration {
        Duration::from_millis(self.overdue_grace_ms)
    }

    /// Query timeout.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

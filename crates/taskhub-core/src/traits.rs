//! Interfaces of the collaborators the notification core depends on.
//!
//! Implementations live outside the core (`taskhub-store` ships SQLite
//! versions); tests use in-memory fakes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{QueryError, StoreError};
use crate::ids::{NotificationId, TaskId, UserId};

/// A task the due-date scanner should look at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DueTask {
    /// Task ID.
    pub task_id: TaskId,
    /// Task title, used in notification text.
    pub title: String,
    /// Active assignee to notify.
    pub assignee_id: UserId,
    /// Current due date.
    pub due_at: DateTime<Utc>,
}

/// Read-only query over tasks with due dates.
#[async_trait]
pub trait TaskQuery: Send + Sync {
    /// Tasks due in `[now, now + due_soon_window]` or already past due,
    /// excluding completed and deleted tasks, one row per active assignee.
    async fn due_candidates(
        &self,
        now: DateTime<Utc>,
        due_soon_window: Duration,
    ) -> Result<Vec<DueTask>, QueryError>;
}

/// Delivery status of a persisted notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Created, not yet delivered to a live connection.
    Pending,
    /// Pushed to at least one live connection.
    Delivered,
    /// Read by the user.
    Read,
    /// Delivery was abandoned.
    Failed,
}

impl NotificationStatus {
    /// Storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Backend(format!(
                "invalid notification status: {other}"
            ))),
        }
    }
}

/// Notification persistence the delivery path writes through.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Set a notification's status.
    async fn update_status(
        &self,
        id: &NotificationId,
        status: NotificationStatus,
    ) -> Result<(), StoreError>;

    /// Number of notifications the user has not read yet.
    async fn count_unread(&self, user_id: &UserId) -> Result<u64, StoreError>;
}

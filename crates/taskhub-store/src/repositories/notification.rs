//! Notification repository: persisted notifications and their status.

use std::str::FromStr;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use taskhub_core::traits::NotificationStatus;
use taskhub_core::{NotificationEvent, NotificationId, UserId};

use crate::errors::{DbError, Result};
use crate::repositories::task::ts;

/// Stateless notification repository; every method takes `&Connection`.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Persist an event as a `pending` notification.
    pub fn insert(conn: &Connection, event: &NotificationEvent) -> Result<()> {
        let metadata = serde_json::to_string(&event.metadata)?;
        let now = ts(Utc::now());
        let _ = conn.execute(
            "INSERT INTO notifications
                 (id, user_id, type, title, message, metadata, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8)",
            params![
                event.id.as_str(),
                event.user_id.as_str(),
                event.kind.as_str(),
                event.title,
                event.message,
                metadata,
                ts(event.created_at),
                now,
            ],
        )?;
        Ok(())
    }

    /// Set a notification's status.
    pub fn update_status(
        conn: &Connection,
        id: &NotificationId,
        status: NotificationStatus,
    ) -> Result<()> {
        let changed = conn.execute(
            "UPDATE notifications SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), status.as_str(), ts(Utc::now())],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("notification {id}")));
        }
        Ok(())
    }

    /// Current status of a notification.
    pub fn status(conn: &Connection, id: &NotificationId) -> Result<Option<NotificationStatus>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM notifications WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| {
            NotificationStatus::from_str(&s).map_err(|e| DbError::Corrupt(e.to_string()))
        })
        .transpose()
    }

    /// Notifications the user has not read.
    pub fn count_unread(conn: &Connection, user_id: &UserId) -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND status <> 'read'",
            params![user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Mark every unread notification of a user as read. Returns the count.
    pub fn mark_all_read(conn: &Connection, user_id: &UserId) -> Result<usize> {
        let changed = conn.execute(
            "UPDATE notifications SET status = 'read', updated_at = ?2
             WHERE user_id = ?1 AND status <> 'read'",
            params![user_id.as_str(), ts(Utc::now())],
        )?;
        Ok(changed)
    }
}

//! Async collaborator implementations over the connection pool.
//!
//! `SQLite` calls are blocking, so each trait method checks out a pooled
//! connection on the blocking thread pool.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskhub_core::traits::{DueTask, NotificationStatus, NotificationStore, TaskQuery};
use taskhub_core::{NotificationEvent, NotificationId, QueryError, StoreError, UserId};

use crate::connection::{ConnectionPool, PooledConnection};
use crate::errors::{DbError, Result};
use crate::migrations::run_migrations;
use crate::repositories::{NotificationRepo, TaskRepo};

/// `SQLite`-backed [`TaskQuery`] and [`NotificationStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Wrap a pool and bring its schema up to date.
    pub fn open(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
        drop(conn);
        Ok(Self { pool })
    }

    /// Check out a connection for direct repository access.
    pub fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Persist a notification as `pending` before it is dispatched.
    pub async fn save_notification(&self, event: &NotificationEvent) -> Result<()> {
        let event = event.clone();
        self.with_conn(move |conn| NotificationRepo::insert(conn, &event))
            .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| DbError::Join(e.to_string()))?
    }
}

#[async_trait]
impl TaskQuery for SqliteStore {
    async fn due_candidates(
        &self,
        now: DateTime<Utc>,
        due_soon_window: Duration,
    ) -> std::result::Result<Vec<DueTask>, QueryError> {
        let window = chrono::Duration::from_std(due_soon_window)
            .map_err(|e| QueryError::Backend(format!("window out of range: {e}")))?;
        let until = now + window;
        Ok(self
            .with_conn(move |conn| TaskRepo::due_candidates(conn, until))
            .await?)
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn update_status(
        &self,
        id: &NotificationId,
        status: NotificationStatus,
    ) -> std::result::Result<(), StoreError> {
        let id = id.clone();
        Ok(self
            .with_conn(move |conn| NotificationRepo::update_status(conn, &id, status))
            .await?)
    }

    async fn count_unread(&self, user_id: &UserId) -> std::result::Result<u64, StoreError> {
        let user_id = user_id.clone();
        Ok(self
            .with_conn(move |conn| NotificationRepo::count_unread(conn, &user_id))
            .await?)
    }
}

//! File-backed store shared across pooled connections.

use std::time::Duration;

use chrono::Utc;
use taskhub_core::traits::{NotificationStatus, NotificationStore, TaskQuery};
use taskhub_core::{NotificationEvent, NotificationKind, TaskId, UserId};
use taskhub_store::{ConnectionConfig, NotificationRepo, SqliteStore, TaskRepo, new_file};

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskhub.db");
    let user = UserId::from("alice");
    let task = TaskId::from("report");
    let now = Utc::now();

    let event = NotificationEvent::new(NotificationKind::TaskAssigned, user.clone());
    {
        let store = SqliteStore::open(new_file(&path, &ConnectionConfig::default()).unwrap()).unwrap();
        let conn = store.conn().unwrap();
        TaskRepo::insert(&conn, &task, "Quarterly report", Some(now + chrono::Duration::minutes(5)))
            .unwrap();
        TaskRepo::assign(&conn, &task, &user).unwrap();
        NotificationRepo::insert(&conn, &event).unwrap();
        drop(conn);
        store
            .update_status(&event.id, NotificationStatus::Delivered)
            .await
            .unwrap();
    }

    // Reopen: migrations are a no-op and the data is still there
    let store = SqliteStore::open(new_file(&path, &ConnectionConfig::default()).unwrap()).unwrap();
    let due = store
        .due_candidates(now, Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].title, "Quarterly report");
    assert_eq!(due[0].assignee_id, user);
    assert_eq!(store.count_unread(&user).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_queries_use_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(
        new_file(&dir.path().join("t.db"), &ConnectionConfig::default()).unwrap(),
    )
    .unwrap();
    let user = UserId::from("u");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let user = user.clone();
            tokio::spawn(async move { store.count_unread(&user).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 0);
    }
}

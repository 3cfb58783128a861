//! Task repository: the slice of task state the due-date scanner reads.
//!
//! Task CRUD belongs to the task service; these writes exist so the
//! server and tests can populate the table the scanner queries.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use taskhub_core::traits::DueTask;
use taskhub_core::{TaskId, UserId};

use crate::errors::{DbError, Result};

/// Timestamp column format; fixed width so text order is time order.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

/// Stateless task repository; every method takes `&Connection`.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a task.
    pub fn insert(
        conn: &Connection,
        id: &TaskId,
        title: &str,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = ts(Utc::now());
        let _ = conn.execute(
            "INSERT INTO tasks (id, title, due_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id.as_str(), title, due_at.map(ts), now],
        )?;
        Ok(())
    }

    /// Change (or clear) a task's due date.
    pub fn set_due_at(conn: &Connection, id: &TaskId, due_at: Option<DateTime<Utc>>) -> Result<()> {
        Self::touch(
            conn,
            id,
            "UPDATE tasks SET due_at = ?2, updated_at = ?3 WHERE id = ?1",
            due_at.map(ts),
        )
    }

    /// Mark a task completed.
    pub fn complete(conn: &Connection, id: &TaskId) -> Result<()> {
        Self::touch(
            conn,
            id,
            "UPDATE tasks SET completed_at = ?2, updated_at = ?3 WHERE id = ?1",
            Some(ts(Utc::now())),
        )
    }

    /// Clear a task's completion.
    pub fn reopen(conn: &Connection, id: &TaskId) -> Result<()> {
        Self::touch(
            conn,
            id,
            "UPDATE tasks SET completed_at = ?2, updated_at = ?3 WHERE id = ?1",
            None,
        )
    }

    /// Soft-delete a task.
    pub fn delete(conn: &Connection, id: &TaskId) -> Result<()> {
        Self::touch(
            conn,
            id,
            "UPDATE tasks SET deleted_at = ?2, updated_at = ?3 WHERE id = ?1",
            Some(ts(Utc::now())),
        )
    }

    /// Assign a user (re-activating a previous assignment).
    pub fn assign(conn: &Connection, id: &TaskId, user_id: &UserId) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO task_assignees (task_id, user_id, is_active, assigned_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT (task_id, user_id) DO UPDATE SET is_active = 1",
            params![id.as_str(), user_id.as_str(), ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Deactivate an assignment. Returns whether one existed.
    pub fn unassign(conn: &Connection, id: &TaskId, user_id: &UserId) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE task_assignees SET is_active = 0 WHERE task_id = ?1 AND user_id = ?2",
            params![id.as_str(), user_id.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Open tasks due at or before `until`, one row per active assignee,
    /// ordered by due date.
    pub fn due_candidates(conn: &Connection, until: DateTime<Utc>) -> Result<Vec<DueTask>> {
        let mut stmt = conn.prepare(
            "SELECT t.id, t.title, a.user_id, t.due_at
             FROM tasks t
             JOIN task_assignees a ON a.task_id = t.id AND a.is_active = 1
             WHERE t.due_at IS NOT NULL
               AND t.due_at <= ?1
               AND t.completed_at IS NULL
               AND t.deleted_at IS NULL
             ORDER BY t.due_at, t.id, a.user_id",
        )?;
        let rows = stmt
            .query_map(params![ts(until)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(task_id, title, user_id, due_at)| {
                Ok(DueTask {
                    task_id: TaskId::from(task_id),
                    title,
                    assignee_id: UserId::from(user_id),
                    due_at: parse_ts(&due_at)?,
                })
            })
            .collect()
    }

    fn touch(conn: &Connection, id: &TaskId, sql: &str, value: Option<String>) -> Result<()> {
        let changed = conn.execute(sql, params![id.as_str(), value, ts(Utc::now())])?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("task {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use chrono::Duration;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    fn task(conn: &Connection, id: &str, due: Option<DateTime<Utc>>, assignees: &[&str]) -> TaskId {
        let id = TaskId::from(id);
        TaskRepo::insert(conn, &id, &format!("Task {id}"), due).unwrap();
        for user in assignees {
            TaskRepo::assign(conn, &id, &UserId::from(*user)).unwrap();
        }
        id
    }

    #[test]
    fn candidates_include_due_soon_and_overdue() {
        let conn = setup();
        let now = Utc::now();
        let _ = task(&conn, "soon", Some(now + Duration::minutes(30)), &["u1"]);
        let _ = task(&conn, "late", Some(now - Duration::hours(2)), &["u1"]);
        let _ = task(&conn, "far", Some(now + Duration::days(3)), &["u1"]);
        let _ = task(&conn, "undated", None, &["u1"]);

        let found = TaskRepo::due_candidates(&conn, now + Duration::hours(1)).unwrap();
        let ids: Vec<&str> = found.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["late", "soon"]);
    }

    #[test]
    fn candidates_exclude_completed_deleted_unassigned() {
        let conn = setup();
        let now = Utc::now();
        let due = Some(now + Duration::minutes(10));
        let done = task(&conn, "done", due, &["u1"]);
        let gone = task(&conn, "gone", due, &["u1"]);
        let _ = task(&conn, "nobody", due, &[]);
        let left = task(&conn, "left", due, &["u1"]);
        TaskRepo::complete(&conn, &done).unwrap();
        TaskRepo::delete(&conn, &gone).unwrap();
        assert!(TaskRepo::unassign(&conn, &left, &UserId::from("u1")).unwrap());

        let found = TaskRepo::due_candidates(&conn, now + Duration::hours(1)).unwrap();
        assert!(found.is_empty(), "unexpected: {found:?}");
    }

    #[test]
    fn one_row_per_active_assignee() {
        let conn = setup();
        let now = Utc::now();
        let _ = task(&conn, "shared", Some(now), &["u1", "u2"]);
        let found = TaskRepo::due_candidates(&conn, now + Duration::hours(1)).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].assignee_id.as_str(), "u1");
        assert_eq!(found[1].assignee_id.as_str(), "u2");
    }

    #[test]
    fn reopen_and_reschedule() {
        let conn = setup();
        let now = Utc::now();
        let id = task(&conn, "t", Some(now + Duration::days(2)), &["u1"]);
        TaskRepo::complete(&conn, &id).unwrap();
        TaskRepo::reopen(&conn, &id).unwrap();
        assert!(TaskRepo::due_candidates(&conn, now + Duration::hours(1)).unwrap().is_empty());

        let new_due = now - Duration::minutes(1);
        TaskRepo::set_due_at(&conn, &id, Some(new_due)).unwrap();
        let found = TaskRepo::due_candidates(&conn, now + Duration::hours(1)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(ts(found[0].due_at), ts(new_due));
    }

    #[test]
    fn updates_on_missing_task_fail() {
        let conn = setup();
        let err = TaskRepo::complete(&conn, &TaskId::from("nope")).unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }
}

//! Bookkeeping of which due-date thresholds were already announced.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use taskhub_core::{NotificationKind, TaskId};

/// A due-date threshold a task can cross.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThresholdKind {
    /// Due date is inside the due-soon window.
    DueSoon,
    /// Due date has passed.
    Overdue,
}

impl ThresholdKind {
    /// Both kinds, in crossing order.
    pub const ALL: [Self; 2] = [Self::DueSoon, Self::Overdue];

    /// Log/metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DueSoon => "due_soon",
            Self::Overdue => "overdue",
        }
    }

    /// Notification type emitted on crossing.
    pub fn notification_kind(self) -> NotificationKind {
        match self {
            Self::DueSoon => NotificationKind::TaskDueSoon,
            Self::Overdue => NotificationKind::TaskOverdue,
        }
    }
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crossing that was already announced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DueThresholdRecord {
    /// Task.
    pub task_id: TaskId,
    /// Threshold crossed.
    pub kind: ThresholdKind,
    /// Due date the crossing was computed against.
    pub due_at: DateTime<Utc>,
    /// When the crossing was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Storage for threshold records, at most one per (task, kind).
///
/// Owned by a single scanner and only mutated from its loop task.
pub trait ThresholdStore: Send + Sync {
    /// The record for `(task_id, kind)`, if any.
    fn get(&self, task_id: &TaskId, kind: ThresholdKind) -> Option<&DueThresholdRecord>;

    /// Insert or replace the record for its (task, kind).
    fn record(&mut self, record: DueThresholdRecord);

    /// Drop every record of `task_id`. Returns how many were removed.
    fn clear_task(&mut self, task_id: &TaskId) -> usize;

    /// Tasks with at least one record.
    fn tracked_tasks(&self) -> Vec<TaskId>;

    /// Total records.
    fn len(&self) -> usize;

    /// Whether nothing is recorded.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local threshold store. Records are lost on restart, so a
/// restart may repeat at most one notification per live crossing.
#[derive(Debug, Default)]
pub struct InMemoryThresholdStore {
    records: HashMap<(TaskId, ThresholdKind), DueThresholdRecord>,
}

impl InMemoryThresholdStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThresholdStore for InMemoryThresholdStore {
    fn get(&self, task_id: &TaskId, kind: ThresholdKind) -> Option<&DueThresholdRecord> {
        self.records.get(&(task_id.clone(), kind))
    }

    fn record(&mut self, record: DueThresholdRecord) {
        let _ = self
            .records
            .insert((record.task_id.clone(), record.kind), record);
    }

    fn clear_task(&mut self, task_id: &TaskId) -> usize {
        let before = self.records.len();
        self.records.retain(|(id, _), _| id != task_id);
        before - self.records.len()
    }

    fn tracked_tasks(&self) -> Vec<TaskId> {
        let mut tasks: Vec<TaskId> = self.records.keys().map(|(id, _)| id.clone()).collect();
        tasks.sort();
        tasks.dedup();
        tasks
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

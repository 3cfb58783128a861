//! One due-date scan: query, compare against recorded thresholds, emit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use metrics::{counter, histogram};
use taskhub_core::clock::{Clock, SystemClock};
use taskhub_core::traits::{DueTask, TaskQuery};
use taskhub_core::{NotificationEvent, QueryError, TaskId, UserId};
use taskhub_settings::SchedulerSettings;
use tracing::{debug, info, warn};

use super::thresholds::{DueThresholdRecord, InMemoryThresholdStore, ThresholdKind, ThresholdStore};
use crate::metrics::{
    SCHEDULER_NOTIFICATIONS_TOTAL, SCHEDULER_QUERY_FAILURES_TOTAL, SCHEDULER_TICKS_TOTAL,
    SCHEDULER_TICK_DURATION_SECONDS,
};
use crate::notifier::Notifier;

/// Where threshold notifications go.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Hand off one notification. Must not wait for delivery.
    async fn emit(&self, event: NotificationEvent);
}

#[async_trait]
impl NotificationSink for Notifier {
    async fn emit(&self, event: NotificationEvent) {
        let _ = self.notify(event);
    }
}

/// Outcome of one scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Candidate rows returned by the query.
    pub candidates: usize,
    /// Notifications emitted.
    pub emitted: usize,
    /// Threshold records cleared.
    pub cleared: usize,
    /// The query failed; nothing else happened.
    pub query_failed: bool,
}

/// Compares task due dates against recorded thresholds.
pub struct DueScanner {
    query: Arc<dyn TaskQuery>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    thresholds: Box<dyn ThresholdStore>,
    due_soon_window: Duration,
    overdue_grace: Duration,
    query_timeout: Duration,
}

impl DueScanner {
    /// Scanner on the system clock with an in-memory threshold store.
    pub fn new(
        query: Arc<dyn TaskQuery>,
        sink: Arc<dyn NotificationSink>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            query,
            sink,
            clock: Arc::new(SystemClock),
            thresholds: Box::new(InMemoryThresholdStore::new()),
            due_soon_window: settings.due_soon_window(),
            overdue_grace: settings.overdue_grace(),
            query_timeout: settings.query_timeout(),
        }
    }

    /// Use `clock` for "now".
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `thresholds` for idempotence bookkeeping.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Box<dyn ThresholdStore>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Recorded thresholds.
    pub fn thresholds(&self) -> &dyn ThresholdStore {
        self.thresholds.as_ref()
    }

    /// Run one scan.
    pub async fn tick(&mut self) -> TickReport {
        let started = tokio::time::Instant::now();
        let now = self.clock.now();
        counter!(SCHEDULER_TICKS_TOTAL).increment(1);

        let candidates = match self.query_candidates(now).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "due-date query failed, skipping tick");
                counter!(SCHEDULER_QUERY_FAILURES_TOTAL).increment(1);
                return TickReport {
                    query_failed: true,
                    ..TickReport::default()
                };
            }
        };

        let mut report = TickReport {
            candidates: candidates.len(),
            ..TickReport::default()
        };
        let grouped = group_by_task(candidates);
        let seen: HashSet<TaskId> = grouped.iter().map(|(id, _)| id.clone()).collect();

        for (task_id, rows) in &grouped {
            report.cleared += self.reset_if_rescheduled(task_id, rows[0].due_at);
            let Some(kind) = self.crossing(rows[0].due_at, now) else {
                continue;
            };
            if !self.is_new_crossing(task_id, kind) {
                continue;
            }
            report.emitted += self.announce(task_id, rows, kind).await;
            self.thresholds.record(DueThresholdRecord {
                task_id: task_id.clone(),
                kind,
                due_at: rows[0].due_at,
                recorded_at: now,
            });
        }

        for task_id in self.thresholds.tracked_tasks() {
            if !seen.contains(&task_id) {
                let cleared = self.thresholds.clear_task(&task_id);
                debug!(task_id = %task_id, cleared, "task left the due window, thresholds reset");
                report.cleared += cleared;
            }
        }

        histogram!(SCHEDULER_TICK_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if report.emitted > 0 || report.cleared > 0 {
            info!(
                candidates = report.candidates,
                emitted = report.emitted,
                cleared = report.cleared,
                "due scan complete"
            );
        } else {
            debug!(candidates = report.candidates, "due scan complete");
        }
        report
    }

    async fn query_candidates(&self, now: DateTime<Utc>) -> Result<Vec<DueTask>, QueryError> {
        match tokio::time::timeout(
            self.query_timeout,
            self.query.due_candidates(now, self.due_soon_window),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(self.query_timeout)),
        }
    }

    /// Which threshold `due_at` is past at `now`, the furthest one first.
    fn crossing(&self, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<ThresholdKind> {
        let grace = TimeDelta::from_std(self.overdue_grace).unwrap_or(TimeDelta::MAX);
        let window = TimeDelta::from_std(self.due_soon_window).unwrap_or(TimeDelta::MAX);
        // A grace past the representable range means never overdue.
        if due_at.checked_add_signed(grace).is_some_and(|deadline| deadline < now) {
            Some(ThresholdKind::Overdue)
        } else if due_at <= now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC) {
            Some(ThresholdKind::DueSoon)
        } else {
            None
        }
    }

    /// A due-soon crossing after the overdue one was announced is stale.
    fn is_new_crossing(&self, task_id: &TaskId, kind: ThresholdKind) -> bool {
        if self.thresholds.get(task_id, kind).is_some() {
            return false;
        }
        kind != ThresholdKind::DueSoon
            || self.thresholds.get(task_id, ThresholdKind::Overdue).is_none()
    }

    /// Drop the task's records when its due date moved since they were made.
    fn reset_if_rescheduled(&mut self, task_id: &TaskId, due_at: DateTime<Utc>) -> usize {
        let moved = ThresholdKind::ALL.iter().any(|kind| {
            self.thresholds
                .get(task_id, *kind)
                .is_some_and(|record| record.due_at != due_at)
        });
        if !moved {
            return 0;
        }
        let cleared = self.thresholds.clear_task(task_id);
        info!(task_id = %task_id, due_at = %due_at, "due date changed, thresholds reset");
        cleared
    }

    async fn announce(&self, task_id: &TaskId, rows: &[DueTask], kind: ThresholdKind) -> usize {
        let mut notified: HashSet<&UserId> = HashSet::new();
        for row in rows {
            if !notified.insert(&row.assignee_id) {
                continue;
            }
            let event = NotificationEvent::task_due(
                kind.notification_kind(),
                row.assignee_id.clone(),
                task_id,
                &row.title,
                row.due_at,
            );
            self.sink.emit(event).await;
        }
        counter!(SCHEDULER_NOTIFICATIONS_TOTAL, "kind" => kind.as_str())
            .increment(notified.len() as u64);
        info!(
            task_id = %task_id,
            threshold = %kind,
            assignees = notified.len(),
            "due threshold crossed"
        );
        notified.len()
    }
}

/// Group rows by task, keeping first-seen order.
fn group_by_task(rows: Vec<DueTask>) -> Vec<(TaskId, Vec<DueTask>)> {
    let mut index: HashMap<TaskId, usize> = HashMap::new();
    let mut grouped: Vec<(TaskId, Vec<DueTask>)> = Vec::new();
    for row in rows {
        match index.get(&row.task_id) {
            Some(&i) => grouped[i].1.push(row),
            None => {
                let _ = index.insert(row.task_id.clone(), grouped.len());
                grouped.push((row.task_id.clone(), vec![row]));
            }
        }
    }
    grouped
}

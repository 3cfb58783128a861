//! Periodic due-date scanning.
//!
//! [`DueScanner`] does one scan; [`DueScheduler`] runs it on a fixed
//! interval in its own task. The scanner, threshold store included, is moved
//! into that task on `start` and handed back on `stop`.

mod scanner;
mod thresholds;

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use scanner::{DueScanner, NotificationSink, TickReport};
pub use thresholds::{DueThresholdRecord, InMemoryThresholdStore, ThresholdKind, ThresholdStore};

use crate::errors::SchedulerError;

enum State {
    Idle(DueScanner),
    Running {
        handle: JoinHandle<DueScanner>,
        stop: CancellationToken,
    },
    /// The loop task panicked and took the scanner with it.
    Lost,
}

/// Runs a [`DueScanner`] every `interval`.
pub struct DueScheduler {
    interval: Duration,
    state: Mutex<State>,
}

impl DueScheduler {
    /// Scheduler around `scanner`.
    pub fn new(scanner: DueScanner, interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(State::Idle(scanner)),
        }
    }

    /// Start the scan loop. It stops when `cancel` fires or on
    /// [`stop`](Self::stop). The first scan runs immediately.
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        let scanner = match std::mem::replace(&mut *state, State::Lost) {
            State::Idle(scanner) => scanner,
            running @ State::Running { .. } => {
                *state = running;
                return Err(SchedulerError::AlreadyStarted);
            }
            State::Lost => return Err(SchedulerError::Join("scanner lost in an earlier failure".into())),
        };

        let stop = cancel.child_token();
        let handle = tokio::spawn(run_loop(scanner, self.interval, stop.clone()));
        *state = State::Running { handle, stop };
        Ok(())
    }

    /// Cancel the loop and wait for the in-flight scan to finish.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let (handle, stop) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Lost) {
                State::Running { handle, stop } => (handle, stop),
                other => {
                    *state = other;
                    return Err(SchedulerError::NotRunning);
                }
            }
        };

        stop.cancel();
        match handle.await {
            Ok(scanner) => {
                *self.state.lock() = State::Idle(scanner);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "due scheduler loop failed");
                Err(SchedulerError::Join(e.to_string()))
            }
        }
    }

    /// Whether the loop is running.
    pub fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), State::Running { handle, .. } if !handle.is_finished())
    }

    /// Recorded thresholds, available while stopped.
    pub fn threshold_count(&self) -> Option<usize> {
        match &*self.state.lock() {
            State::Idle(scanner) => Some(scanner.thresholds().len()),
            _ => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
async fn run_loop(mut scanner: DueScanner, interval: Duration, stop: CancellationToken) -> DueScanner {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "due scheduler started");

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let _ = scanner.tick().await;
            }
        }
    }

    info!("due scheduler stopped");
    scanner
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskhub_core::traits::{DueTask, TaskQuery};
    use taskhub_core::{NotificationEvent, QueryError, TaskId, UserId};
    use taskhub_settings::SchedulerSettings;

    /// One task always due in ten minutes; counts queries.
    struct OneTask {
        queries: AtomicUsize,
        slow: Duration,
    }

    #[async_trait]
    impl TaskQuery for OneTask {
        async fn due_candidates(
            &self,
            now: DateTime<Utc>,
            _window: Duration,
        ) -> Result<Vec<DueTask>, QueryError> {
            let _ = self.queries.fetch_add(1, Ordering::SeqCst);
            time::sleep(self.slow).await;
            Ok(vec![DueTask {
                task_id: TaskId::from("t1"),
                title: "Report".into(),
                assignee_id: UserId::from("alice"),
                due_at: now + chrono::Duration::minutes(10),
            }])
        }
    }

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn emit(&self, _event: NotificationEvent) {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scheduler(slow: Duration) -> (DueScheduler, Arc<OneTask>, Arc<CountingSink>) {
        let query = Arc::new(OneTask {
            queries: AtomicUsize::new(0),
            slow,
        });
        let sink = Arc::new(CountingSink::default());
        let scanner = DueScanner::new(query.clone(), sink.clone(), &SchedulerSettings::default());
        (
            DueScheduler::new(scanner, Duration::from_secs(60)),
            query,
            sink,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_and_stops() {
        let (scheduler, query, sink) = scheduler(Duration::ZERO);
        let cancel = CancellationToken::new();
        scheduler.start(&cancel).unwrap();
        assert!(scheduler.is_running());

        time::sleep(Duration::from_secs(150)).await;
        assert_eq!(query.queries.load(Ordering::SeqCst), 3);
        // Due date never moves, so only the first scan notifies.
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.threshold_count(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_and_stop_fail() {
        let (scheduler, _query, _sink) = scheduler(Duration::ZERO);
        let cancel = CancellationToken::new();

        assert_matches!(scheduler.stop().await, Err(SchedulerError::NotRunning));
        scheduler.start(&cancel).unwrap();
        assert_matches!(scheduler.start(&cancel), Err(SchedulerError::AlreadyStarted));
        scheduler.stop().await.unwrap();

        // Restart keeps the threshold state.
        scheduler.start(&cancel).unwrap();
        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.threshold_count(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_tick() {
        let (scheduler, query, sink) = scheduler(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        scheduler.start(&cancel).unwrap();

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(query.queries.load(Ordering::SeqCst), 1);
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);

        scheduler.stop().await.unwrap();
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancel_stops_loop() {
        let (scheduler, query, _sink) = scheduler(Duration::ZERO);
        let cancel = CancellationToken::new();
        scheduler.start(&cancel).unwrap();
        time::sleep(Duration::from_secs(1)).await;

        cancel.cancel();
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(query.queries.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
        scheduler.stop().await.unwrap();
    }
}

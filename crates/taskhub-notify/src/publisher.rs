//! Fire-and-forget delivery with bounded retries.
//!
//! Every publish spawns one retry chain driven by
//! [`taskhub_core::retry::RetryChain`]. Callers get a join handle they may
//! ignore; failures never propagate back, they are logged and counted.
//!
//! First attempts for the same user and channel run in dispatch order: a
//! chain takes its turn synchronously in the caller and waits for the
//! previous chain's first attempt before making its own. Retries are not
//! ordered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use taskhub_core::retry::{ExhaustReason, RetryChain, RetryPolicy, RetryState};
use taskhub_core::{DeliveryError, NotificationEvent, UserId};
use taskhub_settings::PublisherSettings;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::gateway::NotificationGateway;
use crate::metrics::{
    DELIVERY_ATTEMPTS_TOTAL, DELIVERY_CHAINS_ACTIVE, DELIVERY_EXHAUSTED_TOTAL,
    DELIVERY_FAILURES_TOTAL, DELIVERY_SUCCEEDED_TOTAL,
};

/// Channel label for chains started through [`EventPublisher::publish_async`].
const CUSTOM_CHANNEL: &str = "custom";

/// How a retry chain ended.
#[derive(Clone, Debug)]
pub enum PublishOutcome {
    /// An attempt succeeded.
    Delivered {
        /// Attempts used.
        attempts: u32,
    },
    /// The chain gave up and the event was dropped.
    Exhausted {
        /// Attempts used.
        attempts: u32,
        /// Why the chain stopped.
        reason: ExhaustReason,
        /// Error of the final attempt.
        last_error: Option<DeliveryError>,
    },
}

impl PublishOutcome {
    /// Whether the event was delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Attempts used.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

type OrderKey = (UserId, &'static str);

/// Tail of each (user, channel) queue of first attempts.
#[derive(Default)]
struct DispatchQueues {
    next_seq: u64,
    tails: HashMap<OrderKey, (u64, oneshot::Receiver<()>)>,
}

/// A chain's place in its queue. Dropping it lets the next chain go.
struct Turn {
    queues: Arc<Mutex<DispatchQueues>>,
    key: OrderKey,
    seq: u64,
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl Turn {
    fn take(queues: &Arc<Mutex<DispatchQueues>>, user_id: &UserId, channel: &'static str) -> Self {
        let (done, rx) = oneshot::channel();
        let key = (user_id.clone(), channel);
        let mut state = queues.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        let previous = state.tails.insert(key.clone(), (seq, rx)).map(|(_, rx)| rx);
        drop(state);
        Self {
            queues: queues.clone(),
            key,
            seq,
            previous,
            _done: done,
        }
    }

    /// Resolves once the previous chain's first attempt finished or the
    /// chain went away.
    async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            let _ = previous.await;
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let mut state = self.queues.lock();
        if state.tails.get(&self.key).is_some_and(|(seq, _)| *seq == self.seq) {
            let _ = state.tails.remove(&self.key);
        }
    }
}

/// Runs delivery calls off the caller's path with retries.
#[derive(Clone)]
pub struct EventPublisher {
    policy: RetryPolicy,
    tracker: TaskTracker,
    queues: Arc<Mutex<DispatchQueues>>,
}

impl EventPublisher {
    /// Create a publisher.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            tracker: TaskTracker::new(),
            queues: Arc::default(),
        }
    }

    /// Create a publisher from settings.
    pub fn from_settings(settings: &PublisherSettings) -> Self {
        Self::new(settings.retry_policy())
    }

    /// Retry policy applied to every chain.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Spawn a retry chain calling `deliver(event)`.
    pub fn publish_async<F, Fut>(
        &self,
        event: impl Into<Arc<NotificationEvent>>,
        deliver: F,
    ) -> JoinHandle<PublishOutcome>
    where
        F: Fn(Arc<NotificationEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
    {
        self.spawn_chain(event.into(), CUSTOM_CHANNEL, deliver)
    }

    /// Spawn a retry chain delivering through `gateway`.
    pub fn publish_via(
        &self,
        event: impl Into<Arc<NotificationEvent>>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> JoinHandle<PublishOutcome> {
        let channel = gateway.channel();
        self.spawn_chain(event.into(), channel, move |event| {
            let gateway = gateway.clone();
            async move { gateway.deliver(&event).await }
        })
    }

    fn spawn_chain<F, Fut>(
        &self,
        event: Arc<NotificationEvent>,
        channel: &'static str,
        deliver: F,
    ) -> JoinHandle<PublishOutcome>
    where
        F: Fn(Arc<NotificationEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
    {
        gauge!(DELIVERY_CHAINS_ACTIVE).increment(1.0);
        let policy = self.policy.clone();
        let turn = Turn::take(&self.queues, &event.user_id, channel);
        self.tracker.spawn(async move {
            let outcome = run_chain(&policy, &event, channel, turn, deliver).await;
            gauge!(DELIVERY_CHAINS_ACTIVE).decrement(1.0);
            outcome
        })
    }

    /// Chains still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// (user, channel) pairs with a first attempt still queued or running.
    pub fn ordered_queues(&self) -> usize {
        self.queues.lock().tails.len()
    }

    /// Wait up to `grace` for running chains. Returns `false` if some were
    /// still running when the grace elapsed; those keep their own timeouts.
    #[allow(clippy::cast_possible_truncation)]
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending == 0 {
            return true;
        }
        info!(pending, grace_ms = grace.as_millis() as u64, "draining delivery chains");
        if time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                abandoned = self.tracker.len(),
                "delivery chains still running after drain grace"
            );
            return false;
        }
        true
    }
}

#[allow(clippy::cast_possible_truncation)]
async fn run_chain<F, Fut>(
    policy: &RetryPolicy,
    event: &Arc<NotificationEvent>,
    channel: &'static str,
    mut turn: Turn,
    deliver: F,
) -> PublishOutcome
where
    F: Fn(Arc<NotificationEvent>) -> Fut,
    Fut: Future<Output = Result<(), DeliveryError>>,
{
    turn.wait().await;
    let mut turn = Some(turn);
    let started = Instant::now();
    let mut chain = RetryChain::new(policy.clone());
    let mut last_error: Option<DeliveryError> = None;

    loop {
        let Some(attempt) = chain.begin_attempt() else {
            break exhausted(event, channel, chain.attempts(), ExhaustReason::MaxAttempts, last_error);
        };
        counter!(DELIVERY_ATTEMPTS_TOTAL, "channel" => channel).increment(1);

        let budget = policy
            .attempt_timeout
            .min(policy.chain_timeout.saturating_sub(started.elapsed()));
        let result = match time::timeout(budget, deliver(event.clone())).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(budget)),
        };
        drop(turn.take());

        let error = match result {
            Ok(()) => {
                let _ = chain.record_success();
                counter!(DELIVERY_SUCCEEDED_TOTAL, "channel" => channel).increment(1);
                if attempt > 1 {
                    info!(
                        event_type = %event.kind,
                        event_id = %event.id,
                        channel,
                        attempt,
                        "delivered after retry"
                    );
                } else {
                    debug!(event_type = %event.kind, event_id = %event.id, channel, "delivered");
                }
                break PublishOutcome::Delivered { attempts: attempt };
            }
            Err(error) => error,
        };

        counter!(DELIVERY_FAILURES_TOTAL, "channel" => channel).increment(1);
        warn!(
            event_type = %event.kind,
            event_id = %event.id,
            user_id = %event.user_id,
            channel,
            attempt,
            max_attempts = policy.max_attempts,
            error = %error,
            "delivery attempt failed"
        );

        let elapsed = started.elapsed();
        let state = if elapsed >= policy.chain_timeout {
            chain.record_deadline()
        } else {
            chain.record_failure(elapsed, error.is_retryable(), rand::random::<f64>())
        };
        last_error = Some(error);

        match state {
            RetryState::Retrying { next_delay, .. } => {
                debug!(
                    event_id = %event.id,
                    channel,
                    delay_ms = next_delay.as_millis() as u64,
                    "retrying delivery"
                );
                time::sleep(next_delay).await;
            }
            RetryState::Exhausted { attempts, reason } => {
                break exhausted(event, channel, attempts, reason, last_error);
            }
            _ => {
                break exhausted(event, channel, chain.attempts(), ExhaustReason::MaxAttempts, last_error);
            }
        }
    }
}

fn exhausted(
    event: &NotificationEvent,
    channel: &'static str,
    attempts: u32,
    reason: ExhaustReason,
    last_error: Option<DeliveryError>,
) -> PublishOutcome {
    error!(
        event_type = %event.kind,
        event_id = %event.id,
        user_id = %event.user_id,
        channel,
        attempts,
        reason = %reason,
        error = last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
        "delivery failed permanently, dropping event"
    );
    counter!(DELIVERY_EXHAUSTED_TOTAL, "channel" => channel, "reason" => reason.to_string())
        .increment(1);
    PublishOutcome::Exhausted {
        attempts,
        reason,
        last_error,
    }
}

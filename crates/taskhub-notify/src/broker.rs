//! In-process topic broker.
//!
//! Each subscription owns a bounded queue and a worker task, so a slow or
//! panicking handler never blocks publishers or other subscribers. Messages
//! are volatile: nothing is persisted and late subscribers see only what is
//! published after they subscribe.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskhub_core::NotificationEvent;
use taskhub_settings::BrokerSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::errors::BrokerError;
use crate::metrics::{
    BROKER_DROPS_TOTAL, BROKER_HANDLER_PANICS_TOTAL, BROKER_PUBLISHED_TOTAL,
    BROKER_SUBSCRIPTIONS_ACTIVE,
};

/// A message as handed to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Topic it was published on.
    pub topic: String,
    /// JSON payload.
    pub payload: Value,
    /// Publish time.
    pub published_at: DateTime<Utc>,
}

impl BrokerMessage {
    /// Decode the payload as a notification event.
    pub fn event(&self) -> Result<NotificationEvent, serde_json::Error> {
        NotificationEvent::deserialize(&self.payload)
    }
}

/// Consumer of one subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message. Runs on the subscription's worker task.
    async fn handle(&self, message: Arc<BrokerMessage>);

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

struct Slot {
    id: u64,
    name: String,
    tx: mpsc::Sender<Arc<BrokerMessage>>,
}

/// Topic-based fan-out to subscription workers.
pub struct MessageBroker {
    settings: BrokerSettings,
    topics: RwLock<HashMap<String, Vec<Slot>>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl MessageBroker {
    /// Create a broker.
    pub fn new(settings: BrokerSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            topics: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Topic notification events go to by default.
    pub fn notifications_topic(&self) -> &str {
        &self.settings.notifications_topic
    }

    /// Hand `payload` to every current subscriber of `topic`.
    ///
    /// Returns how many subscribers queued it. A full subscriber queue
    /// drops the message for that subscriber only.
    pub fn publish(&self, topic: &str, payload: Value) -> Result<usize, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let message = Arc::new(BrokerMessage {
            topic: topic.to_string(),
            payload,
            published_at: Utc::now(),
        });

        let mut accepted = 0usize;
        let topics = self.topics.read();
        for slot in topics.get(topic).into_iter().flatten() {
            match slot.tx.try_send(message.clone()) {
                Ok(()) => accepted += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        topic,
                        subscriber = %slot.name,
                        capacity = self.settings.subscriber_queue_capacity,
                        "subscriber queue full, dropping message"
                    );
                    counter!(BROKER_DROPS_TOTAL, "topic" => topic.to_string()).increment(1);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        drop(topics);

        counter!(BROKER_PUBLISHED_TOTAL, "topic" => topic.to_string()).increment(1);
        debug!(topic, accepted, "message published");
        Ok(accepted)
    }

    /// Publish a notification event as JSON.
    pub fn publish_event(&self, topic: &str, event: &NotificationEvent) -> Result<usize, BrokerError> {
        let payload = serde_json::to_value(event).map_err(|e| BrokerError::Encode(e.to_string()))?;
        self.publish(topic, payload)
    }

    /// Start a worker delivering future messages on `topic` to `handler`.
    pub fn subscribe(
        self: &Arc<Self>,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BrokerError> {
        let (tx, rx) = mpsc::channel(self.settings.subscriber_queue_capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = handler.name().to_string();
        {
            let mut topics = self.topics.write();
            if self.is_closed() {
                return Err(BrokerError::Closed);
            }
            topics.entry(topic.to_string()).or_default().push(Slot {
                id,
                name: name.clone(),
                tx,
            });
        }
        gauge!(BROKER_SUBSCRIPTIONS_ACTIVE).increment(1.0);

        let _ = self.tracker.spawn(run_worker(
            topic.to_string(),
            name.clone(),
            handler,
            rx,
            self.cancel.clone(),
        ));
        info!(topic, subscriber = %name, subscription_id = id, "subscribed");

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            broker: Arc::downgrade(self),
        })
    }

    fn remove_slot(&self, topic: &str, id: u64) -> bool {
        let mut topics = self.topics.write();
        let Some(slots) = topics.get_mut(topic) else {
            return false;
        };
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        let removed = slots.len() < before;
        if slots.is_empty() {
            let _ = topics.remove(topic);
        }
        drop(topics);

        if removed {
            gauge!(BROKER_SUBSCRIPTIONS_ACTIVE).decrement(1.0);
            info!(topic, subscription_id = id, "unsubscribed");
        }
        removed
    }

    /// Current subscribers of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Topics with at least one subscriber.
    pub fn topics(&self) -> Vec<String> {
        self.topics.read().keys().cloned().collect()
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new publishes and subscriptions, let workers finish queued
    /// messages within the close grace, then cancel the rest.
    #[allow(clippy::cast_precision_loss)]
    pub async fn close(&self) {
        let slots = {
            let mut topics = self.topics.write();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *topics)
        };
        let subscriptions: usize = slots.values().map(Vec::len).sum();
        drop(slots);
        gauge!(BROKER_SUBSCRIPTIONS_ACTIVE).decrement(subscriptions as f64);
        info!(subscriptions, "message broker closing");

        self.tracker.close();
        let grace = self.settings.close_grace();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                grace_ms = self.settings.close_grace_ms,
                "handlers still running after close grace, cancelling"
            );
            self.cancel.cancel();
            self.tracker.wait().await;
        }
        info!("message broker closed");
    }
}

/// Handle to one subscription.
///
/// Dropping it keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to end it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    topic: String,
    broker: Weak<MessageBroker>,
}

impl Subscription {
    /// Subscription ID, unique per broker.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop receiving messages. Already-queued messages are still handled.
    ///
    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self) -> bool {
        self.broker
            .upgrade()
            .is_some_and(|broker| broker.remove_slot(&self.topic, self.id))
    }
}

async fn run_worker(
    topic: String,
    name: String,
    handler: Arc<dyn MessageHandler>,
    mut rx: mpsc::Receiver<Arc<BrokerMessage>>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => message,
        };
        let Some(message) = message else { break };

        let call = AssertUnwindSafe(handler.handle(message)).catch_unwind();
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!(topic = %topic, subscriber = %name, "handler cancelled by broker close");
                break;
            }
            result = call => {
                if result.is_err() {
                    error!(topic = %topic, subscriber = %name, "subscriber handler panicked");
                    counter!(BROKER_HANDLER_PANICS_TOTAL, "topic" => topic.clone()).increment(1);
                }
            }
        }
    }
    debug!(topic = %topic, subscriber = %name, "subscriber worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::time::Duration;
    use taskhub_core::logging::capture_logs;
    use taskhub_core::{NotificationKind, UserId};
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Value>>,
    }

    impl Recorder {
        fn len(&self) -> usize {
            self.seen.lock().len()
        }

        fn values(&self) -> Vec<Value> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: Arc<BrokerMessage>) {
            if message.payload == "boom" {
                panic!("handler exploded");
            }
            self.seen.lock().push(message.payload.clone());
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    /// Blocks each message until a permit is released.
    struct Gated {
        gate: Semaphore,
        done: Mutex<usize>,
    }

    #[async_trait]
    impl MessageHandler for Gated {
        async fn handle(&self, _message: Arc<BrokerMessage>) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            *self.done.lock() += 1;
        }
    }

    struct Sleeper {
        nap: Duration,
        finished: Mutex<usize>,
    }

    #[async_trait]
    impl MessageHandler for Sleeper {
        async fn handle(&self, _message: Arc<BrokerMessage>) {
            tokio::time::sleep(self.nap).await;
            *self.finished.lock() += 1;
        }
    }

    fn settings(capacity: usize) -> BrokerSettings {
        BrokerSettings {
            subscriber_queue_capacity: capacity,
            close_grace_ms: 500,
            ..BrokerSettings::default()
        }
    }

    async fn wait_until(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn publish_without_subscribers() {
        let broker = MessageBroker::new(settings(8));
        assert_eq!(broker.publish("nobody", Value::from(1)).unwrap(), 0);
    }

    #[tokio::test]
    async fn fan_out_to_all_subscribers() {
        let broker = MessageBroker::new(settings(8));
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let _sa = broker.subscribe("t", a.clone()).unwrap();
        let _sb = broker.subscribe("t", b.clone()).unwrap();
        let _other = broker.subscribe("other", Arc::new(Recorder::default())).unwrap();

        assert_eq!(broker.publish("t", Value::from(1)).unwrap(), 2);
        assert_eq!(broker.publish("t", Value::from(2)).unwrap(), 2);

        wait_until(|| a.len() == 2 && b.len() == 2).await;
        assert_eq!(a.values(), [Value::from(1), Value::from(2)]);
        assert_eq!(broker.subscriber_count("t"), 2);
        let mut topics = broker.topics();
        topics.sort();
        assert_eq!(topics, ["other", "t"]);
    }

    #[tokio::test]
    async fn blocked_subscriber_drops_without_blocking_others() {
        let broker = MessageBroker::new(settings(2));
        let gated = Arc::new(Gated {
            gate: Semaphore::new(0),
            done: Mutex::new(0),
        });
        let fast = Arc::new(Recorder::default());
        let _g = broker.subscribe("t", gated.clone()).unwrap();
        let _f = broker.subscribe("t", fast.clone()).unwrap();

        let mut accepted = 0;
        for i in 0..10 {
            accepted += broker.publish("t", Value::from(i)).unwrap();
            tokio::task::yield_now().await;
        }
        wait_until(|| fast.len() == 10).await;
        let gated_accepted = accepted - 10;
        assert!(gated_accepted < 10, "gated subscriber accepted {gated_accepted}");

        gated.gate.add_permits(100);
        wait_until(|| *gated.done.lock() == gated_accepted).await;
        assert_eq!(fast.len(), 10);
    }

    #[tokio::test]
    async fn handler_panic_keeps_worker_alive() {
        let (logs, _guard) = capture_logs();
        let broker = MessageBroker::new(settings(8));
        let rec = Arc::new(Recorder::default());
        let _s = broker.subscribe("t", rec.clone()).unwrap();

        let _ = broker.publish("t", Value::from("boom")).unwrap();
        let _ = broker.publish("t", Value::from("after")).unwrap();

        wait_until(|| rec.len() == 1).await;
        assert_eq!(rec.values(), [Value::from("after")]);
        assert!(logs.has_message("subscriber handler panicked"));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = MessageBroker::new(settings(8));
        let rec = Arc::new(Recorder::default());
        let sub = broker.subscribe("t", rec.clone()).unwrap();
        assert_eq!(sub.topic(), "t");

        let _ = broker.publish("t", Value::from(1)).unwrap();
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(broker.subscriber_count("t"), 0);
        assert!(broker.topics().is_empty());
        assert_eq!(broker.publish("t", Value::from(2)).unwrap(), 0);

        // The message queued before unsubscribing is still handled.
        wait_until(|| rec.len() == 1).await;
    }

    #[tokio::test]
    async fn events_survive_the_topic() {
        let broker = MessageBroker::new(settings(8));
        let rec = Arc::new(Recorder::default());
        let _s = broker.subscribe("notifications", rec.clone()).unwrap();

        let event = NotificationEvent::new(NotificationKind::TaskCompleted, UserId::from("u1"))
            .with_title("Done");
        assert_eq!(broker.publish_event("notifications", &event).unwrap(), 1);
        wait_until(|| rec.len() == 1).await;

        let message = BrokerMessage {
            topic: "notifications".into(),
            payload: rec.values().remove(0),
            published_at: Utc::now(),
        };
        assert_eq!(message.event().unwrap(), event);
    }

    #[tokio::test(start_paused = true)]
    async fn close_lets_in_flight_handlers_finish() {
        let broker = MessageBroker::new(settings(8));
        let sleeper = Arc::new(Sleeper {
            nap: Duration::from_millis(100),
            finished: Mutex::new(0),
        });
        let _s = broker.subscribe("t", sleeper.clone()).unwrap();
        let _ = broker.publish("t", Value::Null).unwrap();
        let _ = broker.publish("t", Value::Null).unwrap();

        broker.close().await;
        assert_eq!(*sleeper.finished.lock(), 2);
        assert!(broker.is_closed());
        assert_matches!(broker.publish("t", Value::Null), Err(BrokerError::Closed));
        assert_matches!(
            broker.subscribe("t", Arc::new(Recorder::default())),
            Err(BrokerError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_stuck_handlers_after_grace() {
        let broker = MessageBroker::new(settings(8));
        let sleeper = Arc::new(Sleeper {
            nap: Duration::from_secs(3600),
            finished: Mutex::new(0),
        });
        let _s = broker.subscribe("t", sleeper.clone()).unwrap();
        let _ = broker.publish("t", Value::Null).unwrap();
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        broker.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(*sleeper.finished.lock(), 0);
        broker.close().await;
    }
}

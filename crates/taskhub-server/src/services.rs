//! Component wiring and ordered shutdown.
//!
//! ```text
//! use-case / scheduler ─► PersistingNotifier ─► Notifier ─┬─► AppChannelGateway ─► ConnectionHub
//!                                                          └─► BrokerGateway ─► "notifications" ─► WebhookRelay
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskhub_core::NotificationEvent;
use taskhub_notify::{
    AppChannelGateway, BrokerGateway, ConnectionHub, DueScanner, DueScheduler, EventPublisher,
    MessageBroker, NotificationSink, Notifier, PublishOutcome, SchedulerError, Subscription,
    WebhookGateway, WebhookRelay,
};
use taskhub_settings::TaskhubSettings;
use taskhub_store::SqliteStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::Result;

/// Saves each notification as `pending`, then dispatches it.
///
/// A failed save is logged and the live push still goes out.
pub struct PersistingNotifier {
    store: SqliteStore,
    notifier: Notifier,
}

impl PersistingNotifier {
    /// Wrap `notifier` with persistence in `store`.
    pub fn new(store: SqliteStore, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Persist and dispatch. Returns one handle per delivery channel.
    pub async fn notify(&self, event: NotificationEvent) -> Vec<JoinHandle<PublishOutcome>> {
        if let Err(e) = self.store.save_notification(&event).await {
            warn!(
                event_id = %event.id,
                user_id = %event.user_id,
                error = %e,
                "failed to persist notification, delivering anyway"
            );
        }
        self.notifier.notify(event)
    }

    /// Channels events are dispatched to.
    pub fn channels(&self) -> Vec<&'static str> {
        self.notifier.channels()
    }
}

#[async_trait]
impl NotificationSink for PersistingNotifier {
    async fn emit(&self, event: NotificationEvent) {
        let _ = self.notify(event).await;
    }
}

/// Every long-lived component of a running server.
pub struct Services {
    settings: TaskhubSettings,
    store: SqliteStore,
    hub: Arc<ConnectionHub>,
    broker: Arc<MessageBroker>,
    publisher: EventPublisher,
    notifications: Arc<PersistingNotifier>,
    scheduler: Option<DueScheduler>,
    _subscriptions: Vec<Subscription>,
}

impl Services {
    /// Build the components from `settings`. Nothing runs until
    /// [`start`](Self::start), except broker subscription workers.
    pub fn build(settings: TaskhubSettings, store: SqliteStore) -> Result<Self> {
        let hub = ConnectionHub::new(settings.hub.clone());
        let broker = MessageBroker::new(settings.broker.clone());
        let publisher = EventPublisher::from_settings(&settings.publisher);

        let app = AppChannelGateway::new(hub.clone()).with_store(Arc::new(store.clone()));
        let notifier = Notifier::new(publisher.clone())
            .with_gateway(Arc::new(app))
            .with_gateway(Arc::new(BrokerGateway::new(broker.clone())));

        let mut subscriptions = Vec::new();
        if let Some(url) = settings.webhook.url.as_deref().filter(|_| settings.webhook.is_enabled()) {
            let timeout = match settings.webhook.timeout_ms {
                0 => settings.publisher.retry_policy().attempt_timeout,
                ms => Duration::from_millis(ms),
            };
            let gateway = Arc::new(WebhookGateway::new(url, timeout)?);
            let relay = Arc::new(WebhookRelay::new(publisher.clone(), gateway));
            subscriptions.push(broker.subscribe(broker.notifications_topic(), relay)?);
            info!(url, "webhook relay enabled");
        }

        let notifications = Arc::new(PersistingNotifier::new(store.clone(), notifier));
        let scheduler = settings.scheduler.enabled.then(|| {
            let scanner = DueScanner::new(
                Arc::new(store.clone()),
                notifications.clone(),
                &settings.scheduler,
            );
            DueScheduler::new(scanner, settings.scheduler.tick_interval())
        });

        Ok(Self {
            settings,
            store,
            hub,
            broker,
            publisher,
            notifications,
            scheduler,
            _subscriptions: subscriptions,
        })
    }

    /// Start the due scheduler, if enabled.
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(scheduler) = &self.scheduler {
            scheduler.start(cancel)?;
        } else {
            info!("due scheduler disabled");
        }
        Ok(())
    }

    /// Connection hub.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// Message broker.
    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    /// Entry point for use-cases emitting notifications.
    pub fn notifications(&self) -> &Arc<PersistingNotifier> {
        &self.notifications
    }

    /// Backing store.
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Whether the due scheduler loop is running.
    pub fn scheduler_running(&self) -> bool {
        self.scheduler.as_ref().is_some_and(DueScheduler::is_running)
    }

    /// Stop everything in dependency order: scheduler, broker, hub, then
    /// in-flight delivery chains.
    pub async fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            match scheduler.stop().await {
                Ok(()) => info!(
                    thresholds = scheduler.threshold_count().unwrap_or_default(),
                    "due scheduler stopped"
                ),
                Err(SchedulerError::NotRunning) => {}
                Err(e) => warn!(error = %e, "due scheduler did not stop cleanly"),
            }
        }
        self.broker.close().await;
        self.hub.shutdown().await;

        if !self.publisher.drain(self.settings.publisher.drain_grace()).await {
            warn!(
                in_flight = self.publisher.in_flight(),
                "abandoning in-flight deliveries"
            );
        }
        info!("services stopped");
    }
}

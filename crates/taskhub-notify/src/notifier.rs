//! Use-case entry point for emitting notifications.

use std::sync::Arc;

use taskhub_core::NotificationEvent;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::gateway::NotificationGateway;
use crate::publisher::{EventPublisher, PublishOutcome};

/// Fans one event out to every configured gateway.
///
/// Each gateway gets its own retry chain, so a failing channel never delays
/// or cancels delivery through the others.
#[derive(Clone)]
pub struct Notifier {
    publisher: EventPublisher,
    gateways: Vec<Arc<dyn NotificationGateway>>,
}

impl Notifier {
    /// Notifier without gateways.
    pub fn new(publisher: EventPublisher) -> Self {
        Self {
            publisher,
            gateways: Vec::new(),
        }
    }

    /// Add a delivery channel.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn NotificationGateway>) -> Self {
        self.gateways.push(gateway);
        self
    }

    /// Configured channel names, in dispatch order.
    pub fn channels(&self) -> Vec<&'static str> {
        self.gateways.iter().map(|g| g.channel()).collect()
    }

    /// The publisher running the chains.
    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Start one retry chain per gateway. Never blocks on delivery.
    pub fn notify(&self, event: NotificationEvent) -> Vec<JoinHandle<PublishOutcome>> {
        if self.gateways.is_empty() {
            warn!(event_type = %event.kind, event_id = %event.id, "no delivery channel configured, dropping event");
            return Vec::new();
        }
        debug!(
            event_type = %event.kind,
            event_id = %event.id,
            user_id = %event.user_id,
            channels = self.gateways.len(),
            "dispatching notification"
        );
        let event = Arc::new(event);
        self.gateways
            .iter()
            .map(|gateway| self.publisher.publish_via(event.clone(), gateway.clone()))
            .collect()
    }
}

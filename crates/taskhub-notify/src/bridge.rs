//! Broker consumers that move notifications onward.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::broker::{BrokerMessage, MessageHandler};
use crate::gateway::NotificationGateway;
use crate::hub::ConnectionHub;
use crate::publisher::EventPublisher;

/// Forwards notification messages to the target user's live connections.
pub struct HubBridge {
    hub: Arc<ConnectionHub>,
}

impl HubBridge {
    /// Bridge into `hub`.
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MessageHandler for HubBridge {
    async fn handle(&self, message: Arc<BrokerMessage>) {
        match message.event() {
            Ok(event) => {
                if !self.hub.send_to_user(&event.user_id, &event) {
                    debug!(user_id = %event.user_id, event_id = %event.id, "no live connection, skipped");
                }
            }
            Err(e) => warn!(topic = %message.topic, error = %e, "dropping undecodable message"),
        }
    }

    fn name(&self) -> &str {
        "hub_bridge"
    }
}

/// Starts a retry chain through a gateway for every notification message.
///
/// Used for the webhook: the broker worker stays free while the publisher
/// retries in the background.
pub struct WebhookRelay {
    publisher: EventPublisher,
    gateway: Arc<dyn NotificationGateway>,
}

impl WebhookRelay {
    /// Relay through `gateway` using `publisher`'s retry policy.
    pub fn new(publisher: EventPublisher, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { publisher, gateway }
    }
}

#[async_trait]
impl MessageHandler for WebhookRelay {
    async fn handle(&self, message: Arc<BrokerMessage>) {
        match message.event() {
            Ok(event) => {
                let _ = self.publisher.publish_via(event, self.gateway.clone());
            }
            Err(e) => warn!(topic = %message.topic, error = %e, "dropping undecodable message"),
        }
    }

    fn name(&self) -> &str {
        "webhook_relay"
    }
}

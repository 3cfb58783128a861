//! Hand-off to the message broker.

use std::sync::Arc;

use async_trait::async_trait;
use taskhub_core::{DeliveryError, NotificationEvent};

use super::NotificationGateway;
use crate::broker::MessageBroker;
use crate::errors::BrokerError;

/// Publishes events to a broker topic for downstream consumers.
pub struct BrokerGateway {
    broker: Arc<MessageBroker>,
    topic: String,
}

impl BrokerGateway {
    /// Publish on the broker's notifications topic.
    pub fn new(broker: Arc<MessageBroker>) -> Self {
        let topic = broker.notifications_topic().to_string();
        Self { broker, topic }
    }

    /// Publish on `topic` instead.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Target topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl NotificationGateway for BrokerGateway {
    fn channel(&self) -> &'static str {
        "broker"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        match self.broker.publish_event(&self.topic, event) {
            Ok(_) => Ok(()),
            Err(BrokerError::Closed) => Err(DeliveryError::Closed("message broker is closed".into())),
            Err(BrokerError::Encode(message)) => Err(DeliveryError::Other(message)),
        }
    }
}

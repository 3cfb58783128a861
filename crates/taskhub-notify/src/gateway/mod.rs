//! Delivery channels a notification can be pushed through.
//!
//! A gateway performs one delivery attempt. Retries, timeouts, and logging
//! of failures belong to [`crate::publisher::EventPublisher`].

mod app;
mod broker;
mod webhook;

use async_trait::async_trait;
use taskhub_core::{DeliveryError, NotificationEvent};

pub use app::{AppChannelGateway, unread_count_frame};
pub use broker::BrokerGateway;
pub use webhook::WebhookGateway;

/// One delivery channel.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Channel name used in logs and metric labels.
    fn channel(&self) -> &'static str;

    /// Attempt delivery once.
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError>;
}

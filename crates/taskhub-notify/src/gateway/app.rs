//! Live push to connected clients.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use taskhub_core::traits::{NotificationStatus, NotificationStore};
use taskhub_core::{DeliveryError, NotificationEvent, StoreError};
use tracing::debug;

use super::NotificationGateway;
use crate::hub::ConnectionHub;

/// Frame carrying the user's unread notification count.
pub fn unread_count_frame(count: u64) -> String {
    json!({
        "type": "notification.unread_count",
        "data": { "count": count },
    })
    .to_string()
}

/// Pushes the wire payload to every live connection of the target user.
///
/// With a store attached, a pushed notification is marked `delivered` and
/// the user receives a fresh unread count. An offline user is not a failure:
/// the notification stays `pending` for the next fetch.
pub struct AppChannelGateway {
    hub: Arc<ConnectionHub>,
    store: Option<Arc<dyn NotificationStore>>,
}

impl AppChannelGateway {
    /// Gateway without status tracking.
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub, store: None }
    }

    /// Track delivery status and unread counts in `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.store = Some(store);
        self
    }
}

#[async_trait]
impl NotificationGateway for AppChannelGateway {
    fn channel(&self) -> &'static str {
        "app"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        if !self.hub.send_to_user(&event.user_id, event) {
            if !self.hub.is_accepting() {
                return Err(DeliveryError::Closed("connection hub is shutting down".into()));
            }
            debug!(
                user_id = %event.user_id,
                event_id = %event.id,
                "user offline, notification stays pending"
            );
            return Ok(());
        }

        let Some(store) = &self.store else {
            return Ok(());
        };

        match store.update_status(&event.id, NotificationStatus::Delivered).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                debug!(event_id = %event.id, "notification not persisted, status not tracked");
            }
            Err(e) => return Err(e.into()),
        }

        let unread = store.count_unread(&event.user_id).await?;
        let _ = self
            .hub
            .send_frame_to_user(&event.user_id, unread_count_frame(unread));
        Ok(())
    }
}

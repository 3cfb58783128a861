//! Outbound HTTP webhook.

use std::time::Duration;

use async_trait::async_trait;
use taskhub_core::{DeliveryError, NotificationEvent};
use tracing::{debug, info};

use super::NotificationGateway;
use crate::errors::NotifyError;

/// Header carrying the target user.
pub const USER_HEADER: &str = "x-taskhub-user";
/// Header carrying the notification ID, stable across retries.
pub const EVENT_ID_HEADER: &str = "x-taskhub-event-id";

const CHANNEL: &str = "webhook";

/// POSTs the wire payload as JSON to a fixed URL.
///
/// Network errors, 5xx, and 429 are retryable; other error statuses are
/// permanent.
pub struct WebhookGateway {
    url: reqwest::Url,
    client: reqwest::Client,
}

impl std::fmt::Debug for WebhookGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookGateway")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl WebhookGateway {
    /// Build a gateway posting to `url` with a per-request `timeout`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| NotifyError::Config(format!("invalid webhook url {url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifyError::Config(format!(
                "webhook url must be http(s), got {}",
                url.scheme()
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        info!(url = %url, timeout_ms = timeout.as_millis() as u64, "webhook gateway initialized");
        Ok(Self { url, client })
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl NotificationGateway for WebhookGateway {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(USER_HEADER, event.user_id.as_str())
            .header(EVENT_ID_HEADER, event.id.as_str())
            .json(&event.to_wire())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Unavailable(format!("webhook timed out: {e}"))
                } else {
                    DeliveryError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(event_id = %event.id, status = status.as_u16(), "webhook accepted");
            return Ok(());
        }
        Err(DeliveryError::Rejected {
            channel: CHANNEL.to_string(),
            status: status.as_u16(),
        })
    }
}

//! Connection hub, broker, publisher, and webhook settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskhub_core::retry::RetryPolicy;

/// Connection hub settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Outbound frames buffered per connection before it is disconnected.
    pub queue_capacity: usize,
    /// Transport ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is considered dead, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// How long shutdown waits for queues to drain, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl HubSettings {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Liveness timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Shutdown drain grace.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Message broker settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Messages buffered per subscriber before new ones are dropped.
    pub subscriber_queue_capacity: usize,
    /// How long `close` waits for in-flight handlers, in milliseconds.
    pub close_grace_ms: u64,
    /// Topic notification events are published on.
    pub notifications_topic: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 1024,
            close_grace_ms: 5_000,
            notifications_topic: "notifications".to_string(),
        }
    }
}

impl BrokerSettings {
    /// Close grace.
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Event publisher retry settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublisherSettings {
    /// Attempts per chain, first try included.
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Symmetric jitter factor (0.0–1.0).
    pub jitter_factor: f64,
    /// Timeout of one deliver call, in milliseconds.
    pub attempt_timeout_ms: u64,
    /// Timeout of a whole chain, in milliseconds.
    pub chain_timeout_ms: u64,
    /// How long shutdown waits for in-flight chains, in milliseconds.
    pub drain_grace_ms: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_factor: 0.2,
            attempt_timeout_ms: 10_000,
            chain_timeout_ms: 30_000,
            drain_grace_ms: 5_000,
        }
    }
}

impl PublisherSettings {
    /// Build the core retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_factor: self.jitter_factor,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            chain_timeout: Duration::from_millis(self.chain_timeout_ms),
        }
    }

    /// Drain grace.
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// Outbound webhook settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookSettings {
    /// Endpoint receiving notification payloads; disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// HTTP request timeout in milliseconds (0 uses the publisher's
    /// attempt timeout).
    pub timeout_ms: u64,
}

impl WebhookSettings {
    /// Whether a webhook endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_defaults() {
        let hub = HubSettings::default();
        assert_eq!(hub.queue_capacity, 256);
        assert_eq!(hub.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(hub.heartbeat_timeout(), Duration::from_secs(90));
        assert_eq!(hub.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn publisher_builds_retry_policy() {
        let publisher = PublisherSettings {
            max_attempts: 5,
            base_delay_ms: 100,
            ..PublisherSettings::default()
        };
        let policy = publisher.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert_eq!(policy.chain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn webhook_disabled_by_default() {
        assert!(!WebhookSettings::default().is_enabled());
        let empty = WebhookSettings {
            url: Some(String::new()),
            timeout_ms: 0,
        };
        assert!(!empty.is_enabled());
        let set: WebhookSettings =
            serde_json::from_str(r#"{"url": "https://hooks.example.com/n"}"#).unwrap();
        assert!(set.is_enabled());
    }

    #[test]
    fn broker_topic_default() {
        assert_eq!(BrokerSettings::default().notifications_topic, "notifications");
    }
}

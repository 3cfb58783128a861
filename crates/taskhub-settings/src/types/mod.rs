//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields take their compiled default.

mod delivery;
mod scheduler;
mod server;

pub use delivery::*;
pub use scheduler::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "scheduler": { "dueSoonWindowMs": 1800000 },
///   "webhook": { "url": "https://hooks.example.com/taskhub" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskhubSettings {
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Connection hub.
    pub hub: HubSettings,
    /// Message broker.
    pub broker: BrokerSettings,
    /// Event publisher retry policy.
    pub publisher: PublisherSettings,
    /// Due-date scanner.
    pub scheduler: SchedulerSettings,
    /// Outbound webhook relay.
    pub webhook: WebhookSettings,
    /// `SQLite` storage.
    pub database: DatabaseSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl TaskhubSettings {
    /// Reject values that would make a component misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let hub = &self.hub;
        ensure(hub.queue_capacity > 0, "hub.queueCapacity must be > 0")?;
        ensure(
            hub.heartbeat_interval_ms > 0,
            "hub.heartbeatIntervalMs must be > 0",
        )?;
        ensure(
            hub.heartbeat_timeout_ms > hub.heartbeat_interval_ms,
            "hub.heartbeatTimeoutMs must exceed hub.heartbeatIntervalMs",
        )?;

        let broker = &self.broker;
        ensure(
            broker.subscriber_queue_capacity > 0,
            "broker.subscriberQueueCapacity must be > 0",
        )?;
        ensure(
            !broker.notifications_topic.is_empty(),
            "broker.notificationsTopic must not be empty",
        )?;

        let publisher = &self.publisher;
        ensure(publisher.max_attempts > 0, "publisher.maxAttempts must be > 0")?;
        ensure(
            publisher.max_delay_ms >= publisher.base_delay_ms,
            "publisher.maxDelayMs must be >= publisher.baseDelayMs",
        )?;
        ensure(
            (0.0..=1.0).contains(&publisher.jitter_factor),
            "publisher.jitterFactor must be within [0, 1]",
        )?;
        ensure(
            publisher.attempt_timeout_ms > 0,
            "publisher.attemptTimeoutMs must be > 0",
        )?;
        ensure(
            publisher.chain_timeout_ms > 0,
            "publisher.chainTimeoutMs must be > 0",
        )?;

        let scheduler = &self.scheduler;
        ensure(
            scheduler.tick_interval_ms > 0,
            "scheduler.tickIntervalMs must be > 0",
        )?;
        ensure(
            scheduler.due_soon_window_ms > 0,
            "scheduler.dueSoonWindowMs must be > 0",
        )?;
        ensure(
            scheduler.query_timeout_ms > 0,
            "scheduler.queryTimeoutMs must be > 0",
        )?;

        if let Some(url) = self.webhook.url.as_deref().filter(|u| !u.is_empty()) {
            ensure(
                url.starts_with("http://") || url.starts_with("https://"),
                "webhook.url must be an http(s) URL",
            )?;
        }

        ensure(self.database.pool_size > 0, "database.poolSize must be > 0")?;
        ensure(!self.database.path.is_empty(), "database.path must not be empty")?;
        Ok(())
    }
}

fn ensure(ok: bool, msg: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn invalid(settings: &TaskhubSettings) -> String {
        match settings.validate() {
            Err(SettingsError::InvalidValue(msg)) => msg,
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_matches!(TaskhubSettings::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let mut s = TaskhubSettings::default();
        s.hub.queue_capacity = 0;
        assert!(invalid(&s).contains("queueCapacity"));
    }

    #[test]
    fn rejects_timeout_not_above_interval() {
        let mut s = TaskhubSettings::default();
        s.hub.heartbeat_timeout_ms = s.hub.heartbeat_interval_ms;
        assert!(invalid(&s).contains("heartbeatTimeoutMs"));
    }

    #[test]
    fn rejects_max_delay_below_base() {
        let mut s = TaskhubSettings::default();
        s.publisher.base_delay_ms = 2_000;
        s.publisher.max_delay_ms = 1_000;
        assert!(invalid(&s).contains("maxDelayMs"));
    }

    #[test]
    fn rejects_jitter_out_of_range() {
        let mut s = TaskhubSettings::default();
        s.publisher.jitter_factor = 1.5;
        assert!(invalid(&s).contains("jitterFactor"));
        s.publisher.jitter_factor = -0.1;
        assert!(invalid(&s).contains("jitterFactor"));
    }

    #[test]
    fn rejects_zero_due_soon_window() {
        let mut s = TaskhubSettings::default();
        s.scheduler.due_soon_window_ms = 0;
        assert!(invalid(&s).contains("dueSoonWindowMs"));
    }

    #[test]
    fn rejects_zero_tick_and_broker_capacity() {
        let mut s = TaskhubSettings::default();
        s.scheduler.tick_interval_ms = 0;
        assert!(invalid(&s).contains("tickIntervalMs"));

        let mut s = TaskhubSettings::default();
        s.broker.subscriber_queue_capacity = 0;
        assert!(invalid(&s).contains("subscriberQueueCapacity"));
    }

    #[test]
    fn rejects_non_http_webhook() {
        let mut s = TaskhubSettings::default();
        s.webhook.url = Some("ftp://example.com".into());
        assert!(invalid(&s).contains("webhook.url"));
        s.webhook.url = Some("https://example.com/hook".into());
        assert_matches!(s.validate(), Ok(()));
    }

    #[test]
    fn json_round_trip_uses_camel_case() {
        let json = serde_json::to_value(TaskhubSettings::default()).unwrap();
        assert_eq!(json["hub"]["queueCapacity"], 256);
        assert_eq!(json["scheduler"]["dueSoonWindowMs"], 3_600_000);
        assert_eq!(json["publisher"]["maxAttempts"], 3);
        assert!(json["webhook"].get("url").is_none());
    }
}

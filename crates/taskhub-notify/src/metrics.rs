//! Metric name constants shared by the notification components.
//!
//! The server installs the Prometheus recorder; until then the `metrics`
//! macros are no-ops.

/// Connections registered (counter).
pub const HUB_CONNECTIONS_OPENED_TOTAL: &str = "hub_connections_opened_total";
/// Connections removed (counter, labels: reason).
pub const HUB_CONNECTIONS_CLOSED_TOTAL: &str = "hub_connections_closed_total";
/// Live connections (gauge).
pub const HUB_CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Connections dropped because their outbound queue was full (counter).
pub const HUB_OVERFLOW_DISCONNECTS_TOTAL: &str = "hub_overflow_disconnects_total";
/// Connections dropped for missing heartbeats (counter).
pub const HUB_HEARTBEAT_TIMEOUTS_TOTAL: &str = "hub_heartbeat_timeouts_total";
/// Frames queued for delivery (counter).
pub const HUB_FRAMES_QUEUED_TOTAL: &str = "hub_frames_queued_total";

/// Messages published (counter, labels: topic).
pub const BROKER_PUBLISHED_TOTAL: &str = "broker_published_total";
/// Messages dropped on a full subscriber queue (counter, labels: topic).
pub const BROKER_DROPS_TOTAL: &str = "broker_drops_total";
/// Handler panics caught (counter, labels: topic).
pub const BROKER_HANDLER_PANICS_TOTAL: &str = "broker_handler_panics_total";
/// Live subscriptions (gauge).
pub const BROKER_SUBSCRIPTIONS_ACTIVE: &str = "broker_subscriptions_active";

/// Delivery attempts (counter, labels: channel).
pub const DELIVERY_ATTEMPTS_TOTAL: &str = "delivery_attempts_total";
/// Failed delivery attempts (counter, labels: channel).
pub const DELIVERY_FAILURES_TOTAL: &str = "delivery_failures_total";
/// Chains that delivered (counter, labels: channel).
pub const DELIVERY_SUCCEEDED_TOTAL: &str = "delivery_succeeded_total";
/// Chains that gave up (counter, labels: channel, reason).
pub const DELIVERY_EXHAUSTED_TOTAL: &str = "delivery_exhausted_total";
/// Chains in flight (gauge).
pub const DELIVERY_CHAINS_ACTIVE: &str = "delivery_chains_active";

/// Scheduler ticks (counter).
pub const SCHEDULER_TICKS_TOTAL: &str = "scheduler_ticks_total";
/// Threshold notifications emitted (counter, labels: kind).
pub const SCHEDULER_NOTIFICATIONS_TOTAL: &str = "scheduler_notifications_total";
/// Task query failures (counter).
pub const SCHEDULER_QUERY_FAILURES_TOTAL: &str = "scheduler_query_failures_total";
/// Tick duration (histogram).
pub const SCHEDULER_TICK_DURATION_SECONDS: &str = "scheduler_tick_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            HUB_CONNECTIONS_OPENED_TOTAL,
            HUB_CONNECTIONS_CLOSED_TOTAL,
            HUB_CONNECTIONS_ACTIVE,
            HUB_OVERFLOW_DISCONNECTS_TOTAL,
            HUB_HEARTBEAT_TIMEOUTS_TOTAL,
            HUB_FRAMES_QUEUED_TOTAL,
            BROKER_PUBLISHED_TOTAL,
            BROKER_DROPS_TOTAL,
            BROKER_HANDLER_PANICS_TOTAL,
            BROKER_SUBSCRIPTIONS_ACTIVE,
            DELIVERY_ATTEMPTS_TOTAL,
            DELIVERY_FAILURES_TOTAL,
            DELIVERY_SUCCEEDED_TOTAL,
            DELIVERY_EXHAUSTED_TOTAL,
            DELIVERY_CHAINS_ACTIVE,
            SCHEDULER_TICKS_TOTAL,
            SCHEDULER_NOTIFICATIONS_TOTAL,
            SCHEDULER_QUERY_FAILURES_TOTAL,
            SCHEDULER_TICK_DURATION_SECONDS,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "not snake_case: {name}"
            );
        }
    }
}

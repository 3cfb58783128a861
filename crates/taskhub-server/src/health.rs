//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting connections, `"shutting_down"` after.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, accepting: bool) -> HealthResponse {
    HealthResponse {
        status: if accepting { "ok" } else { "shutting_down" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

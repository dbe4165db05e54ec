//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"draining"` once shutdown has started.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connections on this worker.
    pub connections: usize,
    /// Whether shutdown has been initiated.
    pub shutting_down: bool,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, shutting_down: bool) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "draining" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        shutting_down,
    }
}

//! `/health` endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Whether the relay currently holds a live queue subscription.
///
/// Written by the queue supervisor, read by `/health`.
#[derive(Debug, Default)]
pub struct QueueStatus {
    connected: AtomicBool,
}

impl QueueStatus {
    /// Create a status that starts disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current connectivity.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Current connectivity.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the queue is connected, `"degraded"` otherwise.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live websocket connections.
    pub connections: usize,
    /// Non-empty rooms.
    pub rooms: usize,
    /// Queue subscription state.
    pub queue_connected: bool,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    rooms: usize,
    queue_connected: bool,
) -> HealthResponse {
    HealthResponse {
        status: if queue_connected { "ok" } else { "degraded" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        rooms,
        queue_connected,
    }
}

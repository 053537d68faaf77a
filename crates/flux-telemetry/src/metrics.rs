//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from a recorder handle.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Queue messages handled (counter, labels: outcome = routed|skipped|rejected).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Broker acknowledgements sent (counter).
pub const RELAY_ACKS_TOTAL: &str = "relay_acks_total";
/// Broker acknowledgements that failed (counter).
pub const RELAY_ACK_FAILURES_TOTAL: &str = "relay_ack_failures_total";
/// Emits performed (counter, labels: event).
pub const RELAY_EMITS_TOTAL: &str = "relay_emits_total";
/// Connections reached per emit (histogram).
pub const RELAY_EMIT_RECIPIENTS: &str = "relay_emit_recipients";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Frames dropped because a client's send queue was full (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Lifetime of a websocket connection (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Successful broker connections (counter).
pub const QUEUE_CONNECTS_TOTAL: &str = "queue_connects_total";
/// Broker connections lost or failed (counter).
pub const QUEUE_DISCONNECTS_TOTAL: &str = "queue_disconnects_total";

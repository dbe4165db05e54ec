//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections rejected because shutdown had started (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Text frames received from clients (counter).
pub const WS_CLIENT_MESSAGES_TOTAL: &str = "ws_client_messages_total";
/// Outbound frames dropped on a full queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Successful bus publishes (counter).
pub const BUS_PUBLISH_TOTAL: &str = "bus_publish_total";
/// Publish attempts that failed (counter).
pub const BUS_PUBLISH_FAILURES_TOTAL: &str = "bus_publish_failures_total";
/// Reconnect-and-retry attempts (counter).
pub const BUS_PUBLISH_RETRIES_TOTAL: &str = "bus_publish_retries_total";
/// Connections force-closed at the drain deadline (counter).
pub const SHUTDOWN_FORCED_CLOSES_TOTAL: &str = "shutdown_forced_closes_total";
/// Periodic notifications broadcast (counter).
pub const PERIODIC_NOTIFICATIONS_TOTAL: &str = "periodic_notifications_total";

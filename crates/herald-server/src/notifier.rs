//! Periodic system notification.

use std::sync::Arc;
use std::time::Duration;

use herald_core::constants::PERIODIC_NOTIFICATION_TEXT;
use herald_core::{Message, Source};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metrics::PERIODIC_NOTIFICATIONS_TOTAL;
use crate::registry::ConnectionRegistry;

/// How the notifier loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifierExit {
    /// The cancel token fired.
    Cancelled,
    /// Shutdown was initiated on the registry.
    ShutdownObserved,
}

/// Broadcasts a system notification every interval while this worker has
/// connections.
pub struct PeriodicNotifier {
    registry: Arc<dyn ConnectionRegistry>,
    interval: Duration,
}

impl PeriodicNotifier {
    /// Create a notifier firing every `interval`.
    pub fn new(registry: Arc<dyn ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run until cancelled or until shutdown starts.
    pub async fn run(&self, cancel: CancellationToken) -> NotifierExit {
        info!(interval_secs = self.interval.as_secs(), "periodic notifier started");
        loop {
            if self.registry.is_shutdown_initiated() {
                return NotifierExit::ShutdownObserved;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("periodic notifier cancelled");
                    return NotifierExit::Cancelled;
                }
                () = tokio::time::sleep(self.interval) => {}
            }

            if self.registry.is_shutdown_initiated() {
                info!("shutdown observed, periodic notifier stopping");
                return NotifierExit::ShutdownObserved;
            }

            let connections = self.registry.connection_count();
            if connections == 0 {
                continue;
            }
            let message = Message::notification(PERIODIC_NOTIFICATION_TEXT, Source::System)
                .with_connection_count(connections);
            match self.registry.broadcast(&message).await {
                Ok(_) => {
                    counter!(PERIODIC_NOTIFICATIONS_TOTAL).increment(1);
                    debug!(connections, "periodic notification sent");
                }
                Err(error) => error!(%error, "failed to send periodic notification"),
            }
        }
    }
}

//! Graceful drain of a worker's connections on a deadline.

use std::sync::Arc;
use std::time::Duration;

use herald_core::constants::{CLOSE_GOING_AWAY, SHUTTING_DOWN_REASON};
use metrics::counter;
use tracing::{info, warn};

use crate::metrics::SHUTDOWN_FORCED_CLOSES_TOTAL;
use crate::registry::ConnectionRegistry;

/// How a drain finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection closed before the deadline.
    Drained,
    /// The deadline passed; `closed` stragglers were force-closed.
    ForceClosed {
        /// Connections force-closed.
        closed: usize,
    },
}

/// Drains the registry: waits for relays to wind down, then force-closes
/// whatever is left once `timeout` has elapsed since shutdown started.
pub struct ShutdownCoordinator {
    registry: Arc<dyn ConnectionRegistry>,
    timeout: Duration,
    check_interval: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the total `timeout` and poll `check_interval`.
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            registry,
            timeout,
            check_interval,
        }
    }

    /// Initiate shutdown and drain.
    ///
    /// Returns once the registry is empty, which is at most `timeout` plus
    /// one `check_interval` after shutdown started.
    pub async fn drain(&self) -> DrainOutcome {
        let _ = self.registry.initiate_shutdown();
        info!(
            timeout_secs = self.timeout.as_secs(),
            connections = self.registry.connection_count(),
            "graceful shutdown started"
        );

        loop {
            let elapsed = self.registry.shutdown_elapsed();
            let count = self.registry.connection_count();

            if count == 0 {
                info!("all connections closed, worker ready to shut down");
                return DrainOutcome::Drained;
            }

            if elapsed >= self.timeout {
                let closed = self.force_close();
                return DrainOutcome::ForceClosed { closed };
            }

            let remaining = self.timeout.saturating_sub(elapsed);
            info!(
                connections = count,
                remaining_secs = remaining.as_secs(),
                "waiting for connections to close"
            );
            tokio::time::sleep(self.check_interval).await;
        }
    }

    fn force_close(&self) -> usize {
        let stragglers = self.registry.active_connections();
        warn!(
            connections = stragglers.len(),
            timeout_secs = self.timeout.as_secs(),
            "shutdown timeout reached, force-closing connections"
        );
        for (id, connection) in &stragglers {
            if let Err(error) = connection.close(CLOSE_GOING_AWAY, SHUTTING_DOWN_REASON) {
                warn!(connection_id = %id, %error, "failed to close connection");
            }
            let _ = self.registry.disconnect(id);
        }
        counter!(SHUTDOWN_FORCED_CLOSES_TOTAL).increment(stragglers.len() as u64);
        info!(closed = stragglers.len(), "forced shutdown complete");
        stragglers.len()
    }
}

//! Worker lifecycle: bus connection and background tasks from start to stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use herald_bus::PubSubBus;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info};

use crate::config::ServerConfig;
use crate::notifier::{NotifierExit, PeriodicNotifier};
use crate::registry::{BusRegistry, ConnectionRegistry};
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};

struct NotifierTask {
    cancel: CancellationToken,
    handle: JoinHandle<NotifierExit>,
}

/// One running worker: owns the bus connection, the registry, and the
/// periodic notifier task.
pub struct Worker {
    bus: Arc<dyn PubSubBus>,
    registry: Arc<BusRegistry>,
    config: ServerConfig,
    notifier: Mutex<Option<NotifierTask>>,
    stopped: AtomicBool,
}

impl Worker {
    /// Create a worker over `bus`. Nothing runs until [`start`](Self::start).
    pub fn new(bus: Arc<dyn PubSubBus>, config: ServerConfig) -> Self {
        let registry = Arc::new(BusRegistry::new(
            Arc::clone(&bus),
            config.channel.clone(),
            config.publish_retries,
        ));
        Self {
            bus,
            registry,
            config,
            notifier: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// The registry shared with the transport.
    pub fn registry(&self) -> Arc<dyn ConnectionRegistry> {
        Arc::clone(&self.registry) as Arc<dyn ConnectionRegistry>
    }

    /// Connect the bus and spawn the notifier.
    ///
    /// A bus connection failure is logged, not returned: the worker still
    /// serves, and broadcasts reconnect on their own.
    pub async fn start(&self) {
        info!(channel = %self.config.channel, "starting worker");
        match self.bus.connect().await {
            Ok(()) => info!("bus connected"),
            Err(error) => error!(%error, "failed to connect bus"),
        }

        if !self.config.notifier_enabled {
            info!("periodic notifier disabled");
            return;
        }
        let notifier = PeriodicNotifier::new(self.registry(), self.config.notifier_interval);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { notifier.run(token).await }.in_current_span());
        let previous = self.notifier.lock().replace(NotifierTask { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Cancel the notifier, drain connections, and disconnect the bus.
    ///
    /// Returns `None` if the worker was already stopped.
    pub async fn stop(&self) -> Option<DrainOutcome> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("worker already stopped");
            return None;
        }
        info!("shutdown signal received, starting graceful shutdown");

        let notifier = self.notifier.lock().take();
        if let Some(task) = notifier {
            task.cancel.cancel();
            match task.handle.await {
                Ok(exit) => debug!(?exit, "periodic notifier stopped"),
                Err(e) => error!(error = %e, "periodic notifier task failed"),
            }
        }

        let coordinator = ShutdownCoordinator::new(
            self.registry(),
            self.config.shutdown_timeout,
            self.config.check_interval,
        );
        let outcome = coordinator.drain().await;

        match self.bus.disconnect().await {
            Ok(()) => info!("bus disconnected"),
            Err(error) => error!(%error, "error disconnecting bus"),
        }
        info!(?outcome, "worker shutdown complete");
        Some(outcome)
    }
}

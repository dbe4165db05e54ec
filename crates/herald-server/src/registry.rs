//! Live connections, shutdown state, and broadcast over the bus.
//!
//! The registry is the only thing the relay, the drain, the notifier, and
//! the HTTP handlers synchronize through. Connections are tracked here from
//! `connect` until `disconnect`; shutdown state only ever moves forward.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_bus::{BusError, PubSubBus, Subscription};
use herald_core::{ConnectionId, Message};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::{
    BUS_PUBLISH_FAILURES_TOTAL, BUS_PUBLISH_RETRIES_TOTAL, BUS_PUBLISH_TOTAL,
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::websocket::connection::ClientConnection;

/// A failed broadcast.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Every publish attempt failed.
    #[error("publish failed after {attempts} attempt(s): {source}")]
    Publish {
        /// Publish attempts made, including the first.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        source: BusError,
    },
}

/// Connection tracking and shutdown state for one worker.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Track `connection` under a fresh id.
    fn connect(&self, connection: Arc<ClientConnection>) -> ConnectionId;

    /// Stop tracking `id`. Returns whether it was tracked.
    fn disconnect(&self, id: &ConnectionId) -> bool;

    /// Publish `message` on the shared channel, returning how many bus
    /// subscribers received it.
    async fn broadcast(&self, message: &Message) -> Result<usize, BroadcastError>;

    /// Connections currently tracked on this worker.
    fn connection_count(&self) -> usize;

    /// Snapshot of the tracked connections.
    fn active_connections(&self) -> Vec<(ConnectionId, Arc<ClientConnection>)>;

    /// Subscribe to the shared channel.
    async fn subscribe(&self) -> Result<Subscription, BusError>;

    /// Mark shutdown as started. Returns `false` if it already was.
    fn initiate_shutdown(&self) -> bool;

    /// Whether shutdown has started.
    fn is_shutdown_initiated(&self) -> bool;

    /// Time since shutdown started; zero before.
    fn shutdown_elapsed(&self) -> Duration;

    /// Token cancelled when shutdown starts.
    fn shutdown_token(&self) -> CancellationToken;
}

/// The production registry, fanning out through a [`PubSubBus`].
pub struct BusRegistry {
    bus: Arc<dyn PubSubBus>,
    channel: String,
    publish_retries: u32,
    active: Mutex<HashMap<ConnectionId, Arc<ClientConnection>>>,
    shutdown_started: Mutex<Option<Instant>>,
    shutdown_token: CancellationToken,
}

impl BusRegistry {
    /// Create a registry publishing on `channel`.
    pub fn new(bus: Arc<dyn PubSubBus>, channel: impl Into<String>, publish_retries: u32) -> Self {
        Self {
            bus,
            channel: channel.into(),
            publish_retries,
            active: Mutex::new(HashMap::new()),
            shutdown_started: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl ConnectionRegistry for BusRegistry {
    fn connect(&self, connection: Arc<ClientConnection>) -> ConnectionId {
        let id = ConnectionId::new();
        let total = {
            let mut active = self.active.lock();
            let _ = active.insert(id.clone(), connection);
            active.len()
        };
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(total as f64);
        info!(connection_id = %id, total, "client connected");
        id
    }

    fn disconnect(&self, id: &ConnectionId) -> bool {
        let (removed, total) = {
            let mut active = self.active.lock();
            let removed = active.remove(id);
            (removed, active.len())
        };
        let Some(connection) = removed else {
            return false;
        };
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(total as f64);
        info!(
            connection_id = %id,
            total,
            connected_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
            "client disconnected"
        );
        true
    }

    async fn broadcast(&self, message: &Message) -> Result<usize, BroadcastError> {
        let payload = message.to_json()?;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.bus.publish(&self.channel, &payload).await {
                Ok(receivers) => {
                    counter!(BUS_PUBLISH_TOTAL).increment(1);
                    debug!(channel = %self.channel, kind = ?message.kind, receivers, attempts, "broadcast published");
                    return Ok(receivers);
                }
                Err(source) => {
                    counter!(BUS_PUBLISH_FAILURES_TOTAL).increment(1);
                    if attempts > self.publish_retries {
                        error!(channel = %self.channel, error = %source, attempts, "broadcast failed");
                        return Err(BroadcastError::Publish { attempts, source });
                    }
                    warn!(channel = %self.channel, error = %source, attempts, "publish failed, reconnecting bus");
                    counter!(BUS_PUBLISH_RETRIES_TOTAL).increment(1);
                    if let Err(error) = self.bus.connect().await {
                        warn!(%error, "bus reconnect failed");
                    }
                }
            }
        }
    }

    fn connection_count(&self) -> usize {
        self.active.lock().len()
    }

    fn active_connections(&self) -> Vec<(ConnectionId, Arc<ClientConnection>)> {
        self.active
            .lock()
            .iter()
            .map(|(id, conn)| (id.clone(), Arc::clone(conn)))
            .collect()
    }

    async fn subscribe(&self) -> Result<Subscription, BusError> {
        self.bus.subscribe(&self.channel).await
    }

    fn initiate_shutdown(&self) -> bool {
        let mut started = self.shutdown_started.lock();
        if started.is_some() {
            return false;
        }
        *started = Some(Instant::now());
        drop(started);
        self.shutdown_token.cancel();
        info!(connections = self.connection_count(), "shutdown initiated");
        true
    }

    fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_started.lock().is_some()
    }

    fn shutdown_elapsed(&self) -> Duration {
        self.shutdown_started
            .lock()
            .map_or(Duration::ZERO, |started| started.elapsed())
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use assert_matches::assert_matches;
    use herald_bus::MemoryBus;
    use herald_core::{MessageType, Source};
    use mockall::mock;
    use proptest::prelude::*;

    use super::*;

    mock! {
        pub Bus {}

        #[async_trait]
        impl PubSubBus for Bus {
            async fn connect(&self) -> Result<(), BusError>;
            async fn disconnect(&self) -> Result<(), BusError>;
            async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError>;
            async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;
            fn is_connected(&self) -> bool;
        }
    }

    fn memory_registry() -> BusRegistry {
        BusRegistry::new(Arc::new(MemoryBus::new()), "notifications", 1)
    }

    fn connection() -> Arc<ClientConnection> {
        Arc::new(ClientConnection::channel(4).0)
    }

    #[test]
    fn connect_assigns_unique_ids() {
        let registry = memory_registry();
        let a = registry.connect(connection());
        let b = registry.connect(connection());
        assert_ne!(a, b);
        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.active_connections().len(), 2);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let registry = memory_registry();
        let id = registry.connect(connection());
        assert!(registry.disconnect(&id));
        assert!(!registry.disconnect(&id));
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn disconnect_unknown_id_is_a_noop() {
        let registry = memory_registry();
        let _ = registry.connect(connection());
        assert!(!registry.disconnect(&ConnectionId::new()));
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_is_monotonic() {
        let registry = memory_registry();
        let token = registry.shutdown_token();
        assert!(!registry.is_shutdown_initiated());
        assert_eq!(registry.shutdown_elapsed(), Duration::ZERO);

        assert!(registry.initiate_shutdown());
        assert!(token.is_cancelled());
        tokio::time::sleep(Duration::from_millis(2)).await;
        let first = registry.shutdown_elapsed();
        assert!(first > Duration::ZERO);

        assert!(!registry.initiate_shutdown());
        assert!(registry.is_shutdown_initiated());
        assert!(registry.shutdown_elapsed() >= first);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_elapsed_tracks_runtime_clock() {
        let registry = memory_registry();
        let _ = registry.initiate_shutdown();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.shutdown_elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let bus = Arc::new(MemoryBus::new());
        bus.connect().await.unwrap();
        let registry = BusRegistry::new(bus, "notifications", 1);
        let mut sub = registry.subscribe().await.unwrap();

        let sent = registry
            .broadcast(&Message::notification("hello", Source::Api))
            .await
            .unwrap();
        assert_eq!(sent, 1);

        let event = sub.next().await.unwrap();
        let message: Message = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(message.kind, MessageType::Notification);
        assert_eq!(message.message, "hello");
        assert_eq!(message.source, Some(Source::Api));
    }

    #[tokio::test]
    async fn broadcast_reconnects_and_retries_once() {
        let mut bus = MockBus::new();
        let mut calls = 0;
        let _ = bus.expect_publish().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(BusError::NotConnected)
            } else {
                Ok(3)
            }
        });
        let _ = bus.expect_connect().times(1).returning(|| Ok(()));

        let registry = BusRegistry::new(Arc::new(bus), "notifications", 1);
        let sent = registry
            .broadcast(&Message::notification("x", Source::System))
            .await
            .unwrap();
        assert_eq!(sent, 3);
    }

    #[tokio::test]
    async fn broadcast_surfaces_failure_after_retries() {
        let mut bus = MockBus::new();
        let _ = bus
            .expect_publish()
            .times(2)
            .returning(|_, _| Err(BusError::Backend("down".into())));
        let _ = bus.expect_connect().times(1).returning(|| Ok(()));

        let registry = BusRegistry::new(Arc::new(bus), "notifications", 1);
        let err = registry
            .broadcast(&Message::notification("x", Source::Api))
            .await
            .unwrap_err();
        assert_matches!(err, BroadcastError::Publish { attempts: 2, .. });
        assert!(err.to_string().contains("down"));
    }

    #[tokio::test]
    async fn broadcast_retries_even_when_reconnect_fails() {
        let mut bus = MockBus::new();
        let _ = bus
            .expect_publish()
            .times(3)
            .returning(|_, _| Err(BusError::NotConnected));
        let _ = bus
            .expect_connect()
            .times(2)
            .returning(|| Err(BusError::Backend("refused".into())));

        let registry = BusRegistry::new(Arc::new(bus), "notifications", 2);
        let err = registry
            .broadcast(&Message::notification("x", Source::Api))
            .await
            .unwrap_err();
        assert_matches!(err, BroadcastError::Publish { attempts: 3, .. });
    }

    #[tokio::test]
    async fn zero_retries_fails_fast() {
        let mut bus = MockBus::new();
        let _ = bus
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(BusError::NotConnected));
        let _ = bus.expect_connect().never();

        let registry = BusRegistry::new(Arc::new(bus), "notifications", 0);
        let err = registry
            .broadcast(&Message::notification("x", Source::Api))
            .await
            .unwrap_err();
        assert_matches!(err, BroadcastError::Publish { attempts: 1, .. });
    }

    #[derive(Clone, Debug)]
    enum Op {
        Connect,
        Disconnect(usize),
        DisconnectUnknown,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Connect),
            3 => any::<usize>().prop_map(Op::Disconnect),
            1 => Just(Op::DisconnectUnknown),
        ]
    }

    proptest! {
        #[test]
        fn count_matches_model(ops in proptest::collection::vec(op(), 0..64)) {
            let registry = memory_registry();
            let mut issued: Vec<ConnectionId> = Vec::new();
            let mut live: HashSet<ConnectionId> = HashSet::new();

            for op in ops {
                match op {
                    Op::Connect => {
                        let id = registry.connect(connection());
                        prop_assert!(live.insert(id.clone()));
                        issued.push(id);
                    }
                    Op::Disconnect(i) => {
                        if issued.is_empty() {
                            continue;
                        }
                        let id = &issued[i % issued.len()];
                        prop_assert_eq!(registry.disconnect(id), live.remove(id));
                    }
                    Op::DisconnectUnknown => {
                        prop_assert!(!registry.disconnect(&ConnectionId::new()));
                    }
                }
                prop_assert_eq!(registry.connection_count(), live.len());
            }
        }
    }
}

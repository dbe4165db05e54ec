//! In-process bus on `tokio::sync::broadcast`.
//!
//! Notifications never leave the process, so this backend only makes sense
//! for a single worker and for tests. It honours the same connection
//! contract as the Redis backend: publish and subscribe fail with
//! [`BusError::NotConnected`] until [`PubSubBus::connect`] is called, and
//! [`PubSubBus::disconnect`] ends every open subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::errors::BusError;
use crate::subscription::{BusEvent, Subscription};
use crate::PubSubBus;

/// Default per-channel buffer.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process publish-subscribe bus.
pub struct MemoryBus {
    capacity: usize,
    connected: AtomicBool,
    channels: Mutex<HashMap<String, broadcast::Sender<BusEvent>>>,
}

impl MemoryBus {
    /// Create a disconnected bus with the default per-channel buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a disconnected bus; each channel buffers `capacity` events per
    /// subscriber before the slowest subscriber starts lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            connected: AtomicBool::new(false),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<BusEvent> {
        self.channels
            .lock()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn ensure_connected(&self) -> Result<(), BusError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubBus for MemoryBus {
    async fn connect(&self) -> Result<(), BusError> {
        self.connected.store(true, Ordering::Release);
        debug!("memory bus connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.connected.store(false, Ordering::Release);
        // Dropping the senders closes every receiver, ending open subscriptions.
        self.channels.lock().clear();
        debug!("memory bus disconnected");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError> {
        self.ensure_connected()?;
        let event = BusEvent {
            channel: channel.to_owned(),
            payload: payload.to_owned(),
        };
        // `send` only fails when nobody is subscribed.
        Ok(self.sender(channel).send(event).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        self.ensure_connected()?;
        let mut rx = self.sender(channel).subscribe();
        let name = channel.to_owned();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %name, skipped, "subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(Subscription::new(channel, Box::pin(stream)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

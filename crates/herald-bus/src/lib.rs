//! # herald-bus
//!
//! The publish-subscribe bus that carries notifications between workers.
//!
//! - [`PubSubBus`]: connect / disconnect / publish / subscribe
//! - [`Subscription`]: scoped handle over a lazy, infinite event sequence;
//!   released exactly once, explicitly or on drop
//! - [`MemoryBus`]: in-process backend (single worker, tests)
//! - [`RedisBus`]: Redis pub/sub backend shared by every worker

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod redis_bus;
pub mod subscription;

use std::sync::Arc;

use async_trait::async_trait;
use herald_settings::{BusBackend, BusSettings};

pub use errors::BusError;
pub use memory::MemoryBus;
pub use redis_bus::RedisBus;
pub use subscription::{BusEvent, BusEventStream, Subscription};

/// A publish-subscribe broker.
#[async_trait]
pub trait PubSubBus: Send + Sync {
    /// Establish (or re-establish) the publishing connection.
    async fn connect(&self) -> Result<(), BusError>;

    /// Drop the publishing connection.
    async fn disconnect(&self) -> Result<(), BusError>;

    /// Publish `payload` on `channel`, returning how many subscribers received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError>;

    /// Subscribe to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;

    /// Whether the publishing connection is currently established.
    fn is_connected(&self) -> bool;
}

/// Build the bus selected by `settings`.
pub fn build_bus(settings: &BusSettings) -> Result<Arc<dyn PubSubBus>, BusError> {
    match settings.backend {
        BusBackend::Memory => Ok(Arc::new(MemoryBus::new())),
        BusBackend::Redis => Ok(Arc::new(RedisBus::new(&settings.redis_url())?)),
    }
}

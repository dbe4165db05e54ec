//! Pub/sub bus settings.

use serde::{Deserialize, Serialize};

/// Which bus implementation a worker uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// Redis pub/sub, shared across workers.
    #[default]
    Redis,
    /// In-process channels; notifications never leave this worker.
    Memory,
}

impl BusBackend {
    /// Parse `redis` / `memory` (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Pub/sub bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Bus implementation.
    pub backend: BusBackend,
    /// Redis host.
    pub redis_host: String,
    /// Redis port.
    pub redis_port: u16,
    /// Shared notification channel name.
    pub channel: String,
    /// Reconnect-and-retry attempts after a failed publish.
    pub publish_retries: u32,
}

impl BusSettings {
    /// Redis connection URL built from host and port.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: BusBackend::Redis,
            redis_host: "redis".into(),
            redis_port: 6379,
            channel: herald_core::constants::NOTIFICATIONS_CHANNEL.into(),
            publish_retries: 1,
        }
    }
}

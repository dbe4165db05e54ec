//! Listener and per-connection relay settings.

use serde::{Deserialize, Serialize};

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Bounded wait for one inbound client message, in milliseconds.
    pub read_timeout_ms: u64,
    /// Pause after sending a shutdown notice before tearing the relay down.
    pub shutdown_notice_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_message_size: 1024 * 1024,
            outbound_buffer: 256,
            read_timeout_ms: 1000,
            shutdown_notice_grace_ms: 500,
        }
    }
}

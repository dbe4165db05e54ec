//! Runtime configuration for a worker, resolved from settings.

use std::time::Duration;

use herald_settings::HeraldSettings;

/// Configuration for the Herald server and its background tasks.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Max `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
    /// Bounded wait for one client frame.
    pub read_timeout: Duration,
    /// Pause after the shutdown notice before the relay tears down.
    pub shutdown_notice_grace: Duration,
    /// Total drain deadline.
    pub shutdown_timeout: Duration,
    /// Drain poll interval.
    pub check_interval: Duration,
    /// Whether the periodic notifier runs.
    pub notifier_enabled: bool,
    /// Periodic notification interval.
    pub notifier_interval: Duration,
    /// Shared notification channel.
    pub channel: String,
    /// Reconnect-and-retry attempts after a failed publish.
    pub publish_retries: u32,
}

impl ServerConfig {
    /// Resolve from loaded settings.
    pub fn from_settings(settings: &HeraldSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            outbound_buffer: settings.server.outbound_buffer,
            read_timeout: Duration::from_millis(settings.server.read_timeout_ms),
            shutdown_notice_grace: Duration::from_millis(settings.server.shutdown_notice_grace_ms),
            shutdown_timeout: Duration::from_secs(settings.shutdown.timeout_secs),
            check_interval: Duration::from_secs(settings.shutdown.check_interval_secs),
            notifier_enabled: settings.notifier.enabled,
            notifier_interval: Duration::from_secs(settings.notifier.interval_secs),
            channel: settings.bus.channel.clone(),
            publish_retries: settings.bus.publish_retries,
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&HeraldSettings::default())
    }
}

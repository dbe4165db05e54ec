//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may specify any subset of fields; missing fields keep their defaults.

mod bus;
mod server;

pub use bus::*;
pub use server::*;

use herald_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings for a Herald worker.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "shutdown": { "timeoutSecs": 60 },
///   "bus": { "backend": "memory" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// HTTP/WebSocket listener and per-connection relay settings.
    pub server: ServerSettings,
    /// Graceful-drain settings.
    pub shutdown: ShutdownSettings,
    /// Periodic notifier settings.
    pub notifier: NotifierSettings,
    /// Pub/sub bus settings.
    pub bus: BusSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl HeraldSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> crate::Result<()> {
        let positive = [
            ("shutdown.checkIntervalSecs", self.shutdown.check_interval_secs),
            ("notifier.intervalSecs", self.notifier.interval_secs),
            ("server.readTimeoutMs", self.server.read_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(crate::SettingsError::InvalidValue(format!(
                    "{name} must be positive"
                )));
            }
        }
        if self.server.outbound_buffer == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "server.outboundBuffer must be positive".into(),
            ));
        }
        if self.bus.channel.is_empty() {
            return Err(crate::SettingsError::InvalidValue(
                "bus.channel must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Graceful-drain settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSettings {
    /// Total time to wait for connections to close before force-closing them.
    pub timeout_secs: u64,
    /// How often the drain loop re-checks the connection count.
    pub check_interval_secs: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30 * 60,
            check_interval_secs: 5,
        }
    }
}

/// Periodic notifier settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifierSettings {
    /// Whether the worker runs the periodic notifier at all.
    pub enabled: bool,
    /// Seconds between periodic notifications.
    pub interval_secs: u64,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Service name attached to the worker span.
    pub service_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Json,
            service_name: "ws-notification-service".into(),
        }
    }
}

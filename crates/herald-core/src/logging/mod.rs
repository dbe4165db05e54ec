//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the process-wide subscriber (compact or JSON)
//! - [`worker_span`] is the root span carrying `service` and `pid`
//! - [`test_utils::capture_logs`] captures events for assertions in tests

pub mod test_utils;

pub use test_utils::{CapturedLogs, capture_logs};

use serde::{Deserialize, Serialize};

/// Output format for the stdout log stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    Compact,
    /// One JSON object per line, including the current span's fields.
    #[default]
    Json,
}

impl LogFormat {
    /// Parse `compact` / `json` (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Initialize the global tracing subscriber writing to stdout.
///
/// `RUST_LOG` takes precedence over `level` when set. Subsequent calls are
/// no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Compact => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stdout)
                .compact()
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stdout)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .try_init();
        }
    }
}

/// Root span for everything a worker process logs.
pub fn worker_span(service: &str) -> tracing::Span {
    tracing::info_span!("worker", service = %service, pid = std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_formats() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("COMPACT"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn default_format_is_json() {
        assert_eq!(LogFormat::default(), LogFormat::Json);
    }

    #[test]
    fn init_subscriber_does_not_panic() {
        init_subscriber("warn", LogFormat::Compact);
        init_subscriber("debug", LogFormat::Json);
    }

    #[test]
    fn events_inside_worker_span_are_captured() {
        let (logs, _guard) = capture_logs();
        let span = worker_span("svc");
        let _entered = span.enter();
        tracing::info!("inside");
        assert!(logs.has_message("inside"));
    }
}

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HeraldSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use herald_core::logging::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{BusBackend, HeraldSettings};

/// Resolve the settings file path: `HERALD_CONFIG`, else `./herald.json`.
pub fn settings_path() -> PathBuf {
    std::env::var("HERALD_CONFIG")
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("herald.json"), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<HeraldSettings> {
    let defaults = serde_json::to_value(HeraldSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut HeraldSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` to read variables.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_overrides_from(settings: &mut HeraldSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Drain and notifier ──────────────────────────────────────────
    if let Some(v) = env.int("SHUTDOWN_TIMEOUT", 0, 7 * 24 * 3600) {
        settings.shutdown.timeout_secs = v;
    }
    if let Some(v) = env.int("CHECK_INTERVAL", 1, 3600) {
        settings.shutdown.check_interval_secs = v;
    }
    if let Some(v) = env.int("PERIODIC_NOTIFICATION", 1, 24 * 3600) {
        settings.notifier.interval_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("LOG_LEVEL") {
        settings.logging.level = v.to_ascii_lowercase();
    }
    if let Some(v) = env.string("SERVICE_NAME") {
        settings.logging.service_name = v;
    }
    if let Some(v) = env.parsed("HERALD_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }

    // ── Bus ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("REDIS_HOST") {
        settings.bus.redis_host = v;
    }
    if let Some(v) = env.int("REDIS_PORT", 1, 65535) {
        settings.bus.redis_port = v as u16;
    }
    if let Some(v) = env.parsed("HERALD_BUS_BACKEND", BusBackend::parse) {
        settings.bus.backend = v;
    }
    if let Some(v) = env.int("HERALD_PUBLISH_RETRIES", 0, 10) {
        settings.bus.publish_retries = v as u32;
    }

    // ── Listener ────────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.int("HERALD_PORT", 0, 65535) {
        settings.server.port = v as u16;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn int(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "unrecognized env var value, ignoring");
        }
        result
    }
}

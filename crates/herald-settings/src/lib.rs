//! # herald-settings
//!
//! Configuration for a Herald worker, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`HeraldSettings::default()`]
//! 2. **Settings file**: `$HERALD_CONFIG` or `./herald.json` (deep-merged)
//! 3. **Environment variables**: `SHUTDOWN_TIMEOUT`, `CHECK_INTERVAL`,
//!    `PERIODIC_NOTIFICATION`, `REDIS_HOST`, `HERALD_*`, ... (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;

//! Application configuration.
//!
//! ## Loading order
//!
//! 1. `EXTRUSIGHT_CONFIG` environment variable (path to TOML file)
//! 2. Environment overrides (`MSSQL_*`, `DATABASE_URL`, `AI_SERVICE_URL`, ...)
//! 3. Built-in defaults
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere.
//! The historian sub-config is additionally overlaid at runtime from the
//! settings store by the poller (see `historian::poller`).

mod app_config;
pub mod defaults;

pub use app_config::{AppConfig, HistorianConfig};

use std::sync::OnceLock;

/// Global application configuration, initialized once at startup.
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration.
pub fn init(config: AppConfig) {
    if APP_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once - ignoring");
    }
}

/// Get the global configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static AppConfig {
    APP_CONFIG
        .get()
        .expect("config::get() called before config::init() - this is a startup bug")
}

/// Whether the config has been initialized (tests and optional paths).
pub fn is_initialized() -> bool {
    APP_CONFIG.get().is_some()
}

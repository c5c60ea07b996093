//! Central constants for the extrusion pipeline.
//!
//! Values that operators tune live in [`AppConfig`](super::AppConfig) or the
//! runtime settings store; the constants here are structural.

/// Default poll interval against the historian (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default rolling-window span (minutes).
pub const DEFAULT_WINDOW_MINUTES: i64 = 10;

/// Hard cap on rows fetched per poll.
pub const DEFAULT_MAX_ROWS_PER_POLL: i64 = 5000;

/// Hard cap on rolling-window rows regardless of time span.
pub const WINDOW_ROW_CAP: usize = 5000;

/// Runtime-config reload throttle (seconds).
pub const CONFIG_RELOAD_SECS: i64 = 30;

/// Backoff ceiling for historian connect failures (seconds).
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Bounded wait for cooperative poller stop (seconds).
pub const POLLER_STOP_TIMEOUT_SECS: u64 = 10;

/// Detector reading-buffer cap (10 minutes at 1 Hz).
pub const READING_BUFFER_CAP: usize = 600;

/// Detector temperature-history cap (5 minutes at 1 Hz).
pub const TEMP_HISTORY_CAP: usize = 300;

/// Readings older than this mark the detector state stale (seconds).
pub const STATE_STALE_SECS: i64 = 300;

/// Minimum samples per metric before a baseline may be finalized.
pub const MIN_SAMPLES_FOR_BASELINE: i64 = 100;

/// ML anomaly score above which a warning flag is raised.
pub const ML_WARNING_THRESHOLD: f64 = 0.7;

/// Lookback for ML predictions feeding the warning flag (minutes).
pub const ML_LOOKBACK_MINUTES: i64 = 30;

/// Max predictions consulted for the ML warning flag.
pub const ML_LOOKBACK_LIMIT: i64 = 10;

/// Stability window (minutes) and ratio bands.
pub const STABILITY_WINDOW_MINUTES: i64 = 10;
pub const STABILITY_GREEN_MAX_RATIO: f64 = 1.2;
pub const STABILITY_ORANGE_MAX_RATIO: f64 = 1.6;

/// Minimum samples in the stability window for a defined ratio.
pub const STABILITY_MIN_SAMPLES: usize = 3;

/// Fixed Temp_Spread thresholds (°C); spread never uses a baseline.
pub const TEMP_SPREAD_GREEN_MAX: f64 = 5.0;
pub const TEMP_SPREAD_ORANGE_MAX: f64 = 8.0;

/// Percent-deviation fallback bands for profile metrics without a
/// configured scoring band.
pub const PCT_GREEN_MAX: f64 = 3.0;
pub const PCT_ORANGE_MAX: f64 = 5.0;

/// AI adapter request timeout (seconds).
pub const AI_TIMEOUT_SECS: u64 = 20;

/// Material id assumed when machine metadata carries none.
pub const DEFAULT_MATERIAL_ID: &str = "Material 1";

/// Machine / sensor-of-record names for the historian feed.
pub const DEFAULT_MACHINE_NAME: &str = "Extruder-SQL";
pub const DEFAULT_SENSOR_NAME: &str = "Extruder SQL Snapshot";

/// Drift-score normalization divisors (bar, °C).
pub const DRIFT_PRESSURE_DIVISOR: f64 = 50.0;
pub const DRIFT_TEMP_DIVISOR: f64 = 20.0;

/// Historian defaults mirroring the legacy plant installation.
pub const DEFAULT_HISTORIAN_DATABASE: &str = "HISTORISCH";
pub const DEFAULT_HISTORIAN_SCHEMA: &str = "dbo";
pub const DEFAULT_HISTORIAN_TABLE: &str = "Tab_Actual";
pub const DEFAULT_HISTORIAN_PORT: u16 = 1433;

/// Settings-store keys.
pub const SETTING_HISTORIAN_CONNECTION: &str = "connections.mssql";
pub const SETTING_EDGE_PC: &str = "connections.edge_pc";

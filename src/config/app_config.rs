//! Application configuration loaded from TOML and environment.

use serde::{Deserialize, Serialize};

use super::defaults;

/// Historian connection and polling configuration.
///
/// The environment provides the bootstrap values; the runtime settings store
/// (`connections.mssql`) overrides them and is reloaded every 30 s by the
/// poller. The `enabled` flag here is the master enable - the settings store
/// carries its own runtime toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorianConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub schema: String,
    pub table: String,
    pub poll_interval_seconds: u64,
    pub window_minutes: i64,
    pub max_rows_per_poll: i64,
    /// SQL driver scheme for the mirror connection (`postgres`, `mysql`,
    /// `sqlite`).
    pub driver: String,
    /// Query dialect: `ansi` (LIMIT) or `mssql2000` (legacy TOP).
    pub dialect: String,
    /// Timestamp column of the historian table.
    pub trend_column: String,
    /// The six value columns, in channel order: screw rpm, pressure,
    /// temperature zones 1-4.
    pub value_columns: Vec<String>,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: String::new(),
            port: defaults::DEFAULT_HISTORIAN_PORT,
            username: String::new(),
            password: String::new(),
            database: defaults::DEFAULT_HISTORIAN_DATABASE.to_string(),
            schema: defaults::DEFAULT_HISTORIAN_SCHEMA.to_string(),
            table: defaults::DEFAULT_HISTORIAN_TABLE.to_string(),
            poll_interval_seconds: defaults::DEFAULT_POLL_INTERVAL_SECS,
            window_minutes: defaults::DEFAULT_WINDOW_MINUTES,
            max_rows_per_poll: defaults::DEFAULT_MAX_ROWS_PER_POLL,
            driver: "postgres".to_string(),
            dialect: "ansi".to_string(),
            trend_column: "TrendDate".to_string(),
            value_columns: vec![
                "Val_4".to_string(),
                "Val_6".to_string(),
                "Val_7".to_string(),
                "Val_8".to_string(),
                "Val_9".to_string(),
                "Val_10".to_string(),
            ],
        }
    }
}

impl HistorianConfig {
    /// Bootstrap from `MSSQL_*` environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            enabled: env_bool("MSSQL_ENABLED", base.enabled),
            host: env_str("MSSQL_HOST", &base.host),
            port: env_parse("MSSQL_PORT", base.port),
            username: env_str("MSSQL_USER", &base.username),
            password: env_str("MSSQL_PASSWORD", &base.password),
            database: env_str("MSSQL_DATABASE", &base.database),
            schema: env_str("MSSQL_SCHEMA", &base.schema),
            table: env_str("MSSQL_TABLE", &base.table),
            poll_interval_seconds: env_parse(
                "MSSQL_POLL_INTERVAL_SECONDS",
                base.poll_interval_seconds,
            ),
            window_minutes: env_parse("MSSQL_WINDOW_MINUTES", base.window_minutes),
            max_rows_per_poll: env_parse("MSSQL_MAX_ROWS_PER_POLL", base.max_rows_per_poll),
            driver: env_str("MSSQL_DRIVER", &base.driver),
            dialect: env_str("MSSQL_DIALECT", &base.dialect),
            trend_column: env_str("MSSQL_TREND_COLUMN", &base.trend_column),
            value_columns: base.value_columns,
        }
    }

    /// Overlay values from the settings-store blob. Present keys win;
    /// absent keys keep the current value. A password masked by a UI read
    /// is ignored.
    pub fn merged_with(&self, blob: &serde_json::Value) -> Self {
        let get_str = |k: &str, cur: &str| -> String {
            match blob.get(k).and_then(serde_json::Value::as_str) {
                Some(s) if !s.is_empty() => s.to_string(),
                _ => cur.to_string(),
            }
        };
        let get_num = |k: &str, cur: i64| -> i64 {
            blob.get(k).and_then(serde_json::Value::as_i64).unwrap_or(cur)
        };

        let mut password = get_str("password", &self.password);
        if password == "********" {
            password = self.password.clone();
        }

        Self {
            // Runtime enable comes exclusively from the settings store.
            enabled: blob
                .get("enabled")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            host: get_str("host", &self.host),
            port: get_num("port", i64::from(self.port)).clamp(1, 65535) as u16,
            username: get_str("username", &self.username),
            password,
            database: get_str("database", &self.database),
            schema: get_str("schema", &self.schema),
            table: get_str("table", &self.table),
            poll_interval_seconds: get_num(
                "poll_interval_seconds",
                self.poll_interval_seconds as i64,
            )
            .max(1) as u64,
            window_minutes: get_num("window_minutes", self.window_minutes).max(1),
            max_rows_per_poll: get_num("max_rows_per_poll", self.max_rows_per_poll).max(1),
            driver: get_str("driver", &self.driver),
            dialect: get_str("dialect", &self.dialect),
            trend_column: get_str("trend_column", &self.trend_column),
            value_columns: blob
                .get("value_columns")
                .and_then(serde_json::Value::as_array)
                .map(|cols| {
                    cols.iter()
                        .filter_map(|c| c.as_str().map(String::from))
                        .collect::<Vec<_>>()
                })
                .filter(|cols| cols.len() == 6)
                .unwrap_or_else(|| self.value_columns.clone()),
        }
    }

    /// Stable fingerprint for change detection; a fingerprint change resets
    /// the rolling window and the high-water mark.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.enabled,
            self.host,
            self.port,
            self.username,
            self.password,
            self.database,
            self.schema,
            self.table,
            self.poll_interval_seconds,
            self.window_minutes,
            self.max_rows_per_poll,
            self.dialect,
            self.trend_column,
            self.value_columns.join(","),
        )
    }

    /// True once host and credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }

    /// Connection URL for the SQL mirror.
    pub fn connection_url(&self) -> String {
        if self.driver == "sqlite" {
            // host carries the file path for sqlite mirrors.
            format!("sqlite://{}", self.host)
        } else {
            format!(
                "{}://{}:{}@{}:{}/{}",
                self.driver, self.username, self.password, self.host, self.port, self.database
            )
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server bind address.
    pub server_addr: String,
    /// Platform database URL (Postgres).
    pub database_url: String,
    /// Base URL of the anomaly-inference service; empty disables it.
    pub ai_service_url: String,
    /// Shared secret for admin-gated routes; empty disables the guard.
    pub admin_token: String,
    /// Wipe alarms/tickets/incident state at startup.
    pub clean_slate_on_startup: bool,
    /// Allow the destructive reset-state command without the admin role.
    pub allow_public_system_reset: bool,
    pub historian: HistorianConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:8080".to_string(),
            database_url: String::new(),
            ai_service_url: String::new(),
            admin_token: String::new(),
            clean_slate_on_startup: false,
            allow_public_system_reset: false,
            historian: HistorianConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `EXTRUSIGHT_CONFIG` (TOML path) if set, then apply
    /// environment overrides. Missing file falls back to defaults.
    pub fn load() -> Self {
        let mut config = match std::env::var("EXTRUSIGHT_CONFIG") {
            Ok(path) => match std::fs::read_to_string(&path) {
                Ok(body) => match toml::from_str::<AppConfig>(&body) {
                    Ok(cfg) => {
                        tracing::info!(path = %path, "Loaded configuration file");
                        cfg
                    }
                    Err(e) => {
                        tracing::error!(path = %path, error = %e, "Invalid config file, using defaults");
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Config file unreadable, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };

        config.server_addr = env_str("EXTRUSIGHT_SERVER_ADDR", &config.server_addr);
        config.database_url = env_str("DATABASE_URL", &config.database_url);
        config.ai_service_url = env_str("AI_SERVICE_URL", &config.ai_service_url);
        config.admin_token = env_str("EXTRUSIGHT_ADMIN_TOKEN", &config.admin_token);
        config.clean_slate_on_startup =
            env_bool("CLEAN_SLATE_ON_STARTUP", config.clean_slate_on_startup);
        config.allow_public_system_reset =
            env_bool("ALLOW_PUBLIC_SYSTEM_RESET", config.allow_public_system_reset);
        config.historian = HistorianConfig::from_env();
        config
    }
}

fn env_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_blob_overrides_env_values() {
        let base = HistorianConfig {
            host: "legacy-host".into(),
            username: "svc".into(),
            password: "secret".into(),
            ..HistorianConfig::default()
        };
        let blob = serde_json::json!({
            "enabled": true,
            "host": "historian.plant.local",
            "window_minutes": 15,
            "password": "********"
        });
        let merged = base.merged_with(&blob);
        assert!(merged.enabled);
        assert_eq!(merged.host, "historian.plant.local");
        assert_eq!(merged.window_minutes, 15);
        // Masked password keeps the bootstrap secret.
        assert_eq!(merged.password, "secret");
        assert_eq!(merged.username, "svc");
    }

    #[test]
    fn runtime_enable_defaults_to_false_without_blob_key() {
        let base = HistorianConfig::default();
        let merged = base.merged_with(&serde_json::json!({}));
        assert!(!merged.enabled);
    }

    #[test]
    fn fingerprint_changes_with_source_settings() {
        let a = HistorianConfig::default();
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.table = "Tab_Archive".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extrusight.toml");
        std::fs::write(
            &path,
            "server_addr = \"127.0.0.1:9999\"\nadmin_token = \"supervisor\"\n",
        )
        .unwrap();

        std::env::set_var("EXTRUSIGHT_CONFIG", &path);
        let cfg = AppConfig::load();
        std::env::remove_var("EXTRUSIGHT_CONFIG");

        assert_eq!(cfg.server_addr, "127.0.0.1:9999");
        assert_eq!(cfg.admin_token, "supervisor");
    }

    #[test]
    fn connection_url_shapes() {
        let mut cfg = HistorianConfig {
            host: "db.local".into(),
            username: "u".into(),
            password: "p".into(),
            ..HistorianConfig::default()
        };
        assert_eq!(
            cfg.connection_url(),
            "postgres://u:p@db.local:1433/HISTORISCH"
        );
        cfg.driver = "sqlite".into();
        cfg.host = "/var/lib/historian.db".into();
        assert_eq!(cfg.connection_url(), "sqlite:///var/lib/historian.db");
    }
}

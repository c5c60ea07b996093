//! Historian query construction.
//!
//! Every query sent to the historian is a single read-only SELECT built
//! here. Identifiers pass an `[A-Za-z0-9_]+` allow-list before they reach
//! SQL text, and the finished statement goes through a select-only guard
//! that rejects anything carrying a write verb or a statement separator.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::config::HistorianConfig;

use super::HistorianError;

/// Query dialect for the SQL mirror.
///
/// `LegacyTop` preserves compatibility with very old SQL Server versions
/// (TOP without parentheses, DATEADD/GETDATE for the cold-start cutoff);
/// `AnsiLimit` targets ANSI-ish mirrors (Postgres, SQLite).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    AnsiLimit,
    LegacyTop,
}

impl SqlDialect {
    pub fn from_config(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "mssql" | "mssql2000" | "top" => SqlDialect::LegacyTop,
            _ => SqlDialect::AnsiLimit,
        }
    }
}

/// Validated identifiers and dialect for one historian table.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    schema: String,
    table: String,
    trend_column: String,
    value_columns: Vec<String>,
    dialect: SqlDialect,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap_or_else(|_| unreachable!()))
}

/// Reject anything that is not a bare `[A-Za-z0-9_]+` identifier.
pub fn validate_identifier(name: &str) -> Result<(), HistorianError> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(HistorianError::InvalidIdentifier(name.to_string()))
    }
}

/// Reject any statement that is not a single read-only SELECT.
pub fn ensure_select_only(sql: &str) -> Result<(), HistorianError> {
    let lowered = sql.trim().to_lowercase();
    if !lowered.starts_with("select") {
        return Err(HistorianError::UnsafeSql("statement is not a SELECT".into()));
    }
    const BLOCKED: [&str; 11] = [
        "insert ", "update ", "delete ", "merge ", "alter ", "drop ", "create ", "truncate ",
        "exec ", "execute ", ";",
    ];
    for token in BLOCKED {
        if lowered.contains(token) {
            return Err(HistorianError::UnsafeSql(format!(
                "blocked token {:?}",
                token.trim()
            )));
        }
    }
    Ok(())
}

impl QuerySpec {
    /// Build a validated spec from the historian configuration.
    pub fn from_config(config: &HistorianConfig) -> Result<Self, HistorianError> {
        validate_identifier(&config.schema)?;
        validate_identifier(&config.table)?;
        validate_identifier(&config.trend_column)?;
        if config.value_columns.len() != 6 {
            return Err(HistorianError::InvalidIdentifier(format!(
                "expected 6 value columns, got {}",
                config.value_columns.len()
            )));
        }
        for column in &config.value_columns {
            validate_identifier(column)?;
        }
        Ok(Self {
            schema: config.schema.clone(),
            table: config.table.clone(),
            trend_column: config.trend_column.clone(),
            value_columns: config.value_columns.clone(),
            dialect: SqlDialect::from_config(&config.dialect),
        })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn table_sql(&self) -> String {
        match self.dialect {
            SqlDialect::LegacyTop => format!("[{}].[{}]", self.schema, self.table),
            SqlDialect::AnsiLimit => format!("{}.{}", self.schema, self.table),
        }
    }

    /// SELECT list: timestamp rendered as text, channels cast to FLOAT and
    /// aliased positionally so row decoding is column-name independent.
    fn select_list(&self) -> String {
        let trend = match self.dialect {
            SqlDialect::LegacyTop => format!(
                "CONVERT(VARCHAR(23), {}, 126) AS trend_date",
                self.trend_column
            ),
            SqlDialect::AnsiLimit => {
                format!("CAST({} AS VARCHAR(33)) AS trend_date", self.trend_column)
            }
        };
        let values: Vec<String> = self
            .value_columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("CAST({} AS FLOAT) AS val{}", col, i + 1))
            .collect();
        format!("{}, {}", trend, values.join(", "))
    }

    /// Cold start: most recent rows within the lookback window, ascending.
    pub fn cold_start_query(
        &self,
        window_minutes: i64,
        max_rows: i64,
        now: DateTime<Utc>,
    ) -> Result<String, HistorianError> {
        let sql = match self.dialect {
            SqlDialect::LegacyTop => format!(
                "SELECT TOP {} {} FROM {} WHERE {} >= DATEADD(minute, -{}, GETDATE()) ORDER BY {} ASC",
                max_rows,
                self.select_list(),
                self.table_sql(),
                self.trend_column,
                window_minutes,
                self.trend_column,
            ),
            SqlDialect::AnsiLimit => {
                let cutoff = now - chrono::Duration::minutes(window_minutes);
                format!(
                    "SELECT {} FROM {} WHERE {} >= '{}' ORDER BY {} ASC LIMIT {}",
                    self.select_list(),
                    self.table_sql(),
                    self.trend_column,
                    format_timestamp(cutoff),
                    self.trend_column,
                    max_rows,
                )
            }
        };
        ensure_select_only(&sql)?;
        Ok(sql)
    }

    /// Incremental: rows strictly after the high-water mark, ascending.
    pub fn incremental_query(
        &self,
        high_water: DateTime<Utc>,
        max_rows: i64,
    ) -> Result<String, HistorianError> {
        let mark = format_timestamp(high_water);
        let sql = match self.dialect {
            SqlDialect::LegacyTop => format!(
                "SELECT TOP {} {} FROM {} WHERE {} > '{}' ORDER BY {} ASC",
                max_rows,
                self.select_list(),
                self.table_sql(),
                self.trend_column,
                mark,
                self.trend_column,
            ),
            SqlDialect::AnsiLimit => format!(
                "SELECT {} FROM {} WHERE {} > '{}' ORDER BY {} ASC LIMIT {}",
                self.select_list(),
                self.table_sql(),
                self.trend_column,
                mark,
                self.trend_column,
                max_rows,
            ),
        };
        ensure_select_only(&sql)?;
        Ok(sql)
    }
}

/// Timestamp literal accepted by all supported mirrors.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Parse the textual trend timestamp returned by the mirrors.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    let trimmed = raw.trim();
    for format in FORMATS {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> HistorianConfig {
        HistorianConfig {
            host: "historian".into(),
            username: "svc".into(),
            password: "pw".into(),
            ..HistorianConfig::default()
        }
    }

    #[test]
    fn identifier_allow_list() {
        assert!(validate_identifier("Tab_Actual").is_ok());
        assert!(validate_identifier("dbo").is_ok());
        assert!(validate_identifier("Tab Actual").is_err());
        assert!(validate_identifier("Tab;DROP").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("tab.actual").is_err());
    }

    #[test]
    fn select_only_guard_blocks_writes() {
        assert!(ensure_select_only("SELECT 1 FROM t").is_ok());
        assert!(ensure_select_only("DELETE FROM t").is_err());
        assert!(ensure_select_only("SELECT 1; DROP TABLE t").is_err());
        assert!(ensure_select_only("select * from t where x = 'update '").is_err());
    }

    #[test]
    fn legacy_dialect_uses_top_and_dateadd() {
        let mut cfg = config();
        cfg.dialect = "mssql2000".into();
        let spec = QuerySpec::from_config(&cfg).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let sql = spec.cold_start_query(10, 5000, now).unwrap();
        assert!(sql.starts_with("SELECT TOP 5000"));
        assert!(sql.contains("DATEADD(minute, -10, GETDATE())"));
        assert!(sql.contains("[dbo].[Tab_Actual]"));
        assert!(sql.contains("ORDER BY TrendDate ASC"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn ansi_dialect_uses_limit_and_client_cutoff() {
        let spec = QuerySpec::from_config(&config()).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let sql = spec.cold_start_query(10, 200, now).unwrap();
        assert!(sql.ends_with("LIMIT 200"));
        assert!(sql.contains("TrendDate >= '2025-03-01 11:50:00.000'"));
        assert!(sql.contains("dbo.Tab_Actual"));
    }

    #[test]
    fn incremental_query_filters_after_high_water() {
        let spec = QuerySpec::from_config(&config()).unwrap();
        let mark = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 45).unwrap();
        let sql = spec.incremental_query(mark, 1000).unwrap();
        assert!(sql.contains("TrendDate > '2025-03-01 12:30:45.000'"));
        assert!(sql.contains("ORDER BY TrendDate ASC"));
    }

    #[test]
    fn spec_rejects_bad_identifiers() {
        let mut cfg = config();
        cfg.table = "Tab_Actual; DROP TABLE x".into();
        assert!(matches!(
            QuerySpec::from_config(&cfg),
            Err(HistorianError::InvalidIdentifier(_))
        ));

        let mut cfg = config();
        cfg.value_columns = vec!["Val_4".into()];
        assert!(QuerySpec::from_config(&cfg).is_err());
    }

    #[test]
    fn timestamp_parsing_accepts_mirror_formats() {
        for raw in [
            "2025-03-01T12:00:00.123",
            "2025-03-01 12:00:00.123",
            "2025-03-01T12:00:00",
            "2025-03-01 12:00:00",
        ] {
            assert!(parse_timestamp(raw).is_some(), "failed on {raw}");
        }
        assert!(parse_timestamp("not a date").is_none());
    }
}

//! Historian source abstraction.
//!
//! The poller reads rows through [`HistorianSource`] so the live SQL mirror
//! and replay/demo feeds share one code path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::HistorianConfig;
use crate::types::HistorianRow;

use super::query::{parse_timestamp, QuerySpec};
use super::HistorianError;

/// What the poller wants from the historian this tick.
#[derive(Debug, Clone, Copy)]
pub enum FetchMode {
    /// First poll (or after a config change): recent rows within the
    /// lookback window.
    ColdStart { window_minutes: i64 },
    /// Steady state: rows strictly after the high-water mark.
    Incremental { high_water: DateTime<Utc> },
}

/// Trait abstracting where historian rows come from.
#[async_trait]
pub trait HistorianSource: Send + Sync {
    /// Fetch up to `max_rows` rows in ascending timestamp order.
    async fn fetch_rows(
        &self,
        mode: FetchMode,
        max_rows: i64,
    ) -> Result<Vec<HistorianRow>, HistorianError>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

// ============================================================================
// SQL mirror source
// ============================================================================

/// Live historian access through an SQL mirror (`sqlx::AnyPool`).
#[derive(Debug)]
pub struct SqlHistorian {
    pool: AnyPool,
    spec: QuerySpec,
}

impl SqlHistorian {
    /// Validate the configuration and open a small connection pool.
    pub async fn connect(config: &HistorianConfig) -> Result<Self, HistorianError> {
        if !config.is_configured() {
            return Err(HistorianError::NotConfigured);
        }
        let spec = QuerySpec::from_config(config)?;

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.connection_url())
            .await
            .map_err(|e| HistorianError::Connection(e.to_string()))?;

        Ok(Self { pool, spec })
    }

    fn decode_row(row: &AnyRow) -> Option<HistorianRow> {
        let raw_ts: Option<String> = row.try_get("trend_date").ok().flatten();
        let timestamp = parse_timestamp(raw_ts.as_deref()?)?;

        // Nulls coerce to 0.0, matching the tolerant float handling of the
        // rest of the pipeline.
        let value = |name: &str| -> f64 {
            row.try_get::<Option<f64>, _>(name)
                .ok()
                .flatten()
                .unwrap_or(0.0)
        };

        Some(HistorianRow {
            timestamp,
            screw_speed_rpm: value("val1"),
            pressure_bar: value("val2"),
            temp_zone1_c: value("val3"),
            temp_zone2_c: value("val4"),
            temp_zone3_c: value("val5"),
            temp_zone4_c: value("val6"),
        })
    }
}

#[async_trait]
impl HistorianSource for SqlHistorian {
    async fn fetch_rows(
        &self,
        mode: FetchMode,
        max_rows: i64,
    ) -> Result<Vec<HistorianRow>, HistorianError> {
        let sql = match mode {
            FetchMode::ColdStart { window_minutes } => {
                self.spec.cold_start_query(window_minutes, max_rows, Utc::now())?
            }
            FetchMode::Incremental { high_water } => {
                self.spec.incremental_query(high_water, max_rows)?
            }
        };

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HistorianError::Query(e.to_string()))?;

        let mut out: Vec<HistorianRow> = rows.iter().filter_map(Self::decode_row).collect();
        let skipped = rows.len() - out.len();
        if skipped > 0 {
            tracing::debug!(skipped, "Historian rows without a parseable timestamp dropped");
        }
        out.sort_by_key(|r| r.timestamp);
        Ok(out)
    }

    fn source_name(&self) -> &str {
        "historian-sql"
    }
}

// ============================================================================
// Replay source
// ============================================================================

/// In-memory source replaying a fixed set of rows; used by `seed-demo` and
/// the pipeline tests. Each fetch drains at most `batch_size` pending rows.
pub struct ReplaySource {
    rows: Mutex<Vec<HistorianRow>>,
    batch_size: usize,
}

impl ReplaySource {
    pub fn new(mut rows: Vec<HistorianRow>, batch_size: usize) -> Self {
        rows.sort_by_key(|r| r.timestamp);
        Self {
            rows: Mutex::new(rows),
            batch_size: batch_size.max(1),
        }
    }

    pub fn remaining(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl HistorianSource for ReplaySource {
    async fn fetch_rows(
        &self,
        mode: FetchMode,
        max_rows: i64,
    ) -> Result<Vec<HistorianRow>, HistorianError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| HistorianError::Query("replay source poisoned".into()))?;

        let limit = (max_rows.max(0) as usize).min(self.batch_size);
        let selected: Vec<HistorianRow> = match mode {
            FetchMode::ColdStart { .. } => rows.iter().take(limit).copied().collect(),
            FetchMode::Incremental { high_water } => rows
                .iter()
                .filter(|r| r.timestamp > high_water)
                .take(limit)
                .copied()
                .collect(),
        };

        if let Some(last) = selected.last() {
            let cutoff = last.timestamp;
            rows.retain(|r| r.timestamp > cutoff);
        }
        Ok(selected)
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn row(offset_secs: i64) -> HistorianRow {
        HistorianRow {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            screw_speed_rpm: 85.0,
            pressure_bar: 30.0,
            temp_zone1_c: 180.0,
            temp_zone2_c: 180.0,
            temp_zone3_c: 180.0,
            temp_zone4_c: 180.0,
        }
    }

    #[tokio::test]
    async fn replay_source_honors_high_water_mark() {
        let source = ReplaySource::new(vec![row(0), row(60), row(120)], 100);
        let first = source
            .fetch_rows(FetchMode::ColdStart { window_minutes: 10 }, 10)
            .await
            .unwrap();
        assert_eq!(first.len(), 3);

        // Nothing new after the last seen timestamp.
        let again = source
            .fetch_rows(
                FetchMode::Incremental {
                    high_water: row(120).timestamp,
                },
                10,
            )
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn replay_source_batches() {
        let source = ReplaySource::new((0..5).map(|i| row(i * 60)).collect(), 2);
        let batch = source
            .fetch_rows(FetchMode::ColdStart { window_minutes: 10 }, 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(source.remaining(), 3);
    }

    #[tokio::test]
    async fn sql_source_requires_configuration() {
        let config = HistorianConfig::default();
        let err = SqlHistorian::connect(&config).await.unwrap_err();
        assert!(matches!(err, HistorianError::NotConfigured));
        assert!(err.is_config_error());
    }
}

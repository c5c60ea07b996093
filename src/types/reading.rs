//! Historian rows and sensor readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw row from the process historian.
///
/// Identity is the timestamp; the poller suppresses duplicates. Channels are
/// pre-coerced to finite floats (nulls become 0.0 at the SQL boundary).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistorianRow {
    /// Historian trend timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Screw rotation speed (rpm).
    pub screw_speed_rpm: f64,
    /// Melt pressure (bar).
    pub pressure_bar: f64,
    /// Barrel temperature zone 1 (°C).
    pub temp_zone1_c: f64,
    /// Barrel temperature zone 2 (°C).
    pub temp_zone2_c: f64,
    /// Barrel temperature zone 3 (°C).
    pub temp_zone3_c: f64,
    /// Barrel temperature zone 4 (°C).
    pub temp_zone4_c: f64,
}

impl HistorianRow {
    /// Temperature zones as a fixed array.
    pub fn temp_zones(&self) -> [f64; 4] {
        [
            self.temp_zone1_c,
            self.temp_zone2_c,
            self.temp_zone3_c,
            self.temp_zone4_c,
        ]
    }

    /// Mean of the four temperature zones.
    pub fn temp_avg(&self) -> f64 {
        let z = self.temp_zones();
        (z[0] + z[1] + z[2] + z[3]) / 4.0
    }

    /// Max minus min across the temperature zones.
    pub fn temp_spread(&self) -> f64 {
        let z = self.temp_zones();
        let max = z.iter().fold(f64::MIN, |a, &b| a.max(b));
        let min = z.iter().fold(f64::MAX, |a, &b| a.min(b));
        max - min
    }
}

/// One sensor reading fed to the machine-state detector.
///
/// Channels are optional so that "machine off" (0.0) can be distinguished
/// from "no data" (None). The historian feed fills the six core channels;
/// motor load and throughput come from optional auxiliary sensors and only
/// participate in the production fallback rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub screw_rpm: Option<f64>,
    pub pressure_bar: Option<f64>,
    pub temp_zone_1: Option<f64>,
    pub temp_zone_2: Option<f64>,
    pub temp_zone_3: Option<f64>,
    pub temp_zone_4: Option<f64>,
    #[serde(default)]
    pub motor_load: Option<f64>,
    #[serde(default)]
    pub throughput_kg_h: Option<f64>,
}

impl SensorReading {
    /// Build a detector reading from a historian row.
    pub fn from_row(row: &HistorianRow) -> Self {
        Self {
            timestamp: row.timestamp,
            screw_rpm: Some(row.screw_speed_rpm),
            pressure_bar: Some(row.pressure_bar),
            temp_zone_1: Some(row.temp_zone1_c),
            temp_zone_2: Some(row.temp_zone2_c),
            temp_zone_3: Some(row.temp_zone3_c),
            temp_zone_4: Some(row.temp_zone4_c),
            motor_load: None,
            throughput_kg_h: None,
        }
    }

    /// Temperature zones that carry a value.
    pub fn valid_temps(&self) -> Vec<f64> {
        [
            self.temp_zone_1,
            self.temp_zone_2,
            self.temp_zone_3,
            self.temp_zone_4,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Mean of available temperature zones, if any.
    pub fn temp_avg(&self) -> Option<f64> {
        let temps = self.valid_temps();
        if temps.is_empty() {
            None
        } else {
            Some(temps.iter().sum::<f64>() / temps.len() as f64)
        }
    }
}

/// Canonical metric names used by baselines, scoring bands, and templates.
pub mod metrics {
    pub const SCREW_SPEED: &str = "ScrewSpeed_rpm";
    pub const PRESSURE: &str = "Pressure_bar";
    pub const TEMP_ZONE1: &str = "Temp_Zone1_C";
    pub const TEMP_ZONE2: &str = "Temp_Zone2_C";
    pub const TEMP_ZONE3: &str = "Temp_Zone3_C";
    pub const TEMP_ZONE4: &str = "Temp_Zone4_C";
    pub const TEMP_AVG: &str = "Temp_Avg";
    pub const TEMP_SPREAD: &str = "Temp_Spread";

    /// The six raw sensor channels.
    pub const SENSOR_KEYS: [&str; 6] = [
        SCREW_SPEED,
        PRESSURE,
        TEMP_ZONE1,
        TEMP_ZONE2,
        TEMP_ZONE3,
        TEMP_ZONE4,
    ];

    /// Metrics eligible for baseline learning.
    pub const BASELINE_METRICS: [&str; 8] = [
        SCREW_SPEED,
        PRESSURE,
        TEMP_ZONE1,
        TEMP_ZONE2,
        TEMP_ZONE3,
        TEMP_ZONE4,
        TEMP_AVG,
        TEMP_SPREAD,
    ];

    /// Metrics that go through the stability evaluation (Temp_Spread is
    /// excluded: it uses fixed thresholds only).
    pub const STABILITY_METRICS: [&str; 7] = [
        SCREW_SPEED,
        PRESSURE,
        TEMP_ZONE1,
        TEMP_ZONE2,
        TEMP_ZONE3,
        TEMP_ZONE4,
        TEMP_AVG,
    ];

    /// Extract a named metric value from a historian row.
    pub fn value_from_row(row: &super::HistorianRow, metric: &str) -> Option<f64> {
        match metric {
            SCREW_SPEED => Some(row.screw_speed_rpm),
            PRESSURE => Some(row.pressure_bar),
            TEMP_ZONE1 => Some(row.temp_zone1_c),
            TEMP_ZONE2 => Some(row.temp_zone2_c),
            TEMP_ZONE3 => Some(row.temp_zone3_c),
            TEMP_ZONE4 => Some(row.temp_zone4_c),
            TEMP_AVG => Some(row.temp_avg()),
            TEMP_SPREAD => Some(row.temp_spread()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> HistorianRow {
        HistorianRow {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            screw_speed_rpm: 85.0,
            pressure_bar: 30.0,
            temp_zone1_c: 178.0,
            temp_zone2_c: 180.0,
            temp_zone3_c: 181.0,
            temp_zone4_c: 179.0,
        }
    }

    #[test]
    fn temp_aggregates() {
        let r = row();
        assert!((r.temp_avg() - 179.5).abs() < 1e-9);
        assert!((r.temp_spread() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn metric_extraction_covers_all_baseline_metrics() {
        let r = row();
        for m in metrics::BASELINE_METRICS {
            assert!(metrics::value_from_row(&r, m).is_some(), "missing {m}");
        }
        assert!(metrics::value_from_row(&r, "NotAMetric").is_none());
    }

    #[test]
    fn reading_distinguishes_missing_channels() {
        let mut reading = SensorReading::from_row(&row());
        reading.temp_zone_3 = None;
        reading.temp_zone_4 = None;
        assert_eq!(reading.valid_temps().len(), 2);
        assert!((reading.temp_avg().unwrap() - 179.0).abs() < 1e-9);
    }
}

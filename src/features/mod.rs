//! Feature Engine - deterministic window statistics.
//!
//! Stateless derivation over the rolling window: per-channel moving
//! statistics, inter-variable correlations, temperature aggregates, the
//! temperature slope against the 5-6 minute back-window, and a scalar drift
//! score. Replaying the same window yields bitwise-identical output.
//!
//! Edge cases: windows with fewer than two samples return neutral zeros,
//! correlations need three samples, and every returned float is finite
//! (NaN coerces to 0, ±∞ to ±10).

use chrono::Duration;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::config::defaults::{DRIFT_PRESSURE_DIVISOR, DRIFT_TEMP_DIVISOR};
use crate::types::HistorianRow;

/// Moving statistics for one channel over the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChannelStats {
    /// Moving average over the window.
    pub ma: f64,
    /// Population std dev over the window.
    pub std: f64,
    /// Last value minus previous value.
    pub delta: f64,
    /// Last value minus moving average.
    pub delta_from_ma: f64,
}

/// Full feature set for one tick.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WindowFeatures {
    pub window_size: usize,
    /// Channel name -> moving stats. Keys: `rpm`, `pressure`, `temp_avg`,
    /// `temp_zone1`..`temp_zone4`.
    pub channels: BTreeMap<String, ChannelStats>,
    pub corr_pressure_rpm: f64,
    pub corr_tempavg_rpm: f64,
    /// °C/min against the 5-6 minute back-window; None without enough history.
    pub temp_slope_c_per_min: Option<f64>,
    /// Combined pressure/temperature drift in [0, 1].
    pub drift_score: f64,
    /// Latest-row snapshot fed to the AI adapter.
    pub readings: BTreeMap<String, f64>,
}

/// Compute the full feature set over a chronologically ordered window.
pub fn compute(window: &[HistorianRow]) -> WindowFeatures {
    let mut features = WindowFeatures {
        window_size: window.len(),
        ..WindowFeatures::default()
    };

    let Some(latest) = window.last() else {
        return features;
    };

    features.readings = latest_readings(latest);

    if window.len() < 2 {
        return features;
    }

    let rpm: Vec<f64> = window.iter().map(|r| r.screw_speed_rpm).collect();
    let pressure: Vec<f64> = window.iter().map(|r| r.pressure_bar).collect();
    let temp_avg: Vec<f64> = window.iter().map(HistorianRow::temp_avg).collect();
    let zones: [Vec<f64>; 4] = [
        window.iter().map(|r| r.temp_zone1_c).collect(),
        window.iter().map(|r| r.temp_zone2_c).collect(),
        window.iter().map(|r| r.temp_zone3_c).collect(),
        window.iter().map(|r| r.temp_zone4_c).collect(),
    ];

    features.channels.insert("rpm".into(), channel_stats(&rpm));
    features
        .channels
        .insert("pressure".into(), channel_stats(&pressure));
    features
        .channels
        .insert("temp_avg".into(), channel_stats(&temp_avg));
    for (i, zone) in zones.iter().enumerate() {
        features
            .channels
            .insert(format!("temp_zone{}", i + 1), channel_stats(zone));
    }

    features.corr_pressure_rpm = pearson(&pressure, &rpm);
    features.corr_tempavg_rpm = pearson(&temp_avg, &rpm);
    features.temp_slope_c_per_min = temp_slope(window);

    let p_drift = features
        .channels
        .get("pressure")
        .map_or(0.0, |c| c.delta_from_ma.abs());
    let t_drift = features
        .channels
        .get("temp_avg")
        .map_or(0.0, |c| c.delta_from_ma.abs());
    features.drift_score = finite(
        ((p_drift / DRIFT_PRESSURE_DIVISOR + t_drift / DRIFT_TEMP_DIVISOR) / 2.0).min(1.0),
    );

    // Enrich the AI snapshot with the window deltas.
    if let Some(c) = features.channels.get("pressure") {
        features.readings.insert("pressure_delta".into(), finite(c.delta));
    }
    if let Some(c) = features.channels.get("rpm") {
        features.readings.insert("rpm_delta".into(), finite(c.delta));
    }
    if let Some(c) = features.channels.get("temp_avg") {
        features
            .readings
            .insert("temp_avg_delta".into(), finite(c.delta));
    }
    features
        .readings
        .insert("corr_pressure_rpm".into(), features.corr_pressure_rpm);

    features
}

/// Moving statistics for one value series.
fn channel_stats(values: &[f64]) -> ChannelStats {
    if values.is_empty() {
        return ChannelStats::default();
    }
    let ma = values.iter().mean();
    let std = if values.len() > 1 {
        values.iter().population_std_dev()
    } else {
        0.0
    };
    let last = values[values.len() - 1];
    let delta = if values.len() >= 2 {
        last - values[values.len() - 2]
    } else {
        0.0
    };
    ChannelStats {
        ma: finite(ma),
        std: finite(std),
        delta: finite(delta),
        delta_from_ma: finite(last - ma),
    }
}

/// Pearson correlation; 0.0 below three samples or for degenerate series.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 3 || b.len() < 3 || a.len() != b.len() {
        return 0.0;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().mean();
    let mean_b = b.iter().mean();
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    let denom = (var_a / n).sqrt() * (var_b / n).sqrt() * n;
    if denom <= f64::EPSILON {
        return 0.0;
    }
    finite(cov / denom)
}

/// Temperature slope (°C/min): current zone average versus the mean of
/// samples 5-6 minutes older than the newest row.
pub fn temp_slope(window: &[HistorianRow]) -> Option<f64> {
    let latest = window.last()?;
    let now = latest.timestamp;
    let lo = now - Duration::minutes(6);
    let hi = now - Duration::minutes(5);

    let historical: Vec<f64> = window
        .iter()
        .filter(|r| r.timestamp >= lo && r.timestamp <= hi)
        .map(HistorianRow::temp_avg)
        .collect();
    if historical.is_empty() {
        return None;
    }
    let historical_avg = historical.iter().mean();
    Some(finite((latest.temp_avg() - historical_avg) / 5.0))
}

/// Coerce to a finite float: NaN -> 0.0, ±∞ -> ±10.0.
pub fn finite(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else if x == f64::INFINITY {
        10.0
    } else if x == f64::NEG_INFINITY {
        -10.0
    } else {
        x
    }
}

fn latest_readings(latest: &HistorianRow) -> BTreeMap<String, f64> {
    let mut readings = BTreeMap::new();
    readings.insert("rpm".into(), latest.screw_speed_rpm);
    readings.insert("pressure".into(), latest.pressure_bar);
    readings.insert("temperature".into(), latest.temp_avg());
    readings.insert("temp_zone1".into(), latest.temp_zone1_c);
    readings.insert("temp_zone2".into(), latest.temp_zone2_c);
    readings.insert("temp_zone3".into(), latest.temp_zone3_c);
    readings.insert("temp_zone4".into(), latest.temp_zone4_c);
    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(offset_secs: i64, rpm: f64, pressure: f64, temp: f64) -> HistorianRow {
        HistorianRow {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            screw_speed_rpm: rpm,
            pressure_bar: pressure,
            temp_zone1_c: temp,
            temp_zone2_c: temp + 1.0,
            temp_zone3_c: temp - 1.0,
            temp_zone4_c: temp,
        }
    }

    #[test]
    fn empty_window_is_neutral() {
        let f = compute(&[]);
        assert_eq!(f.window_size, 0);
        assert!(f.channels.is_empty());
        assert_eq!(f.drift_score, 0.0);
    }

    #[test]
    fn single_row_returns_readings_only() {
        let f = compute(&[row(0, 85.0, 30.0, 180.0)]);
        assert_eq!(f.window_size, 1);
        assert!(f.channels.is_empty());
        assert_eq!(f.readings["pressure"], 30.0);
        assert_eq!(f.readings["temperature"], 180.0);
    }

    #[test]
    fn channel_stats_track_deltas() {
        let window = vec![
            row(0, 80.0, 28.0, 179.0),
            row(60, 82.0, 29.0, 180.0),
            row(120, 84.0, 31.0, 181.0),
        ];
        let f = compute(&window);
        let pressure = &f.channels["pressure"];
        assert!((pressure.ma - 29.333333).abs() < 1e-4);
        assert!((pressure.delta - 2.0).abs() < 1e-9);
        assert!((pressure.delta_from_ma - (31.0 - 29.333333)).abs() < 1e-4);
    }

    #[test]
    fn correlation_requires_three_samples() {
        assert_eq!(pearson(&[1.0, 2.0], &[2.0, 4.0]), 0.0);
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-9);
        let inv = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&a, &inv) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn correlation_of_constant_series_is_zero() {
        let a = [3.0, 3.0, 3.0, 3.0];
        let b = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(pearson(&a, &b), 0.0);
    }

    #[test]
    fn slope_needs_back_window_samples() {
        // Rows only spanning two minutes: no 5-6 min back-window.
        let short: Vec<_> = (0..3).map(|i| row(i * 60, 0.0, 0.0, 100.0)).collect();
        assert_eq!(temp_slope(&short), None);

        // 7 minutes of rising temperature, 1 row per 30 s.
        let rising: Vec<_> = (0..15)
            .map(|i| row(i * 30, 0.0, 0.0, 100.0 + i as f64))
            .collect();
        let slope = temp_slope(&rising).unwrap();
        // ~1 °C per 30 s = 2 °C/min measured over a 5-minute lever arm.
        assert!(slope > 1.5 && slope < 2.5, "slope = {slope}");
    }

    #[test]
    fn drift_score_is_clamped() {
        let window = vec![
            row(0, 80.0, 30.0, 180.0),
            row(60, 80.0, 30.0, 180.0),
            row(120, 80.0, 500.0, 400.0),
        ];
        let f = compute(&window);
        assert!(f.drift_score <= 1.0);
        assert!(f.drift_score > 0.9);
    }

    #[test]
    fn finite_coercion() {
        assert_eq!(finite(f64::NAN), 0.0);
        assert_eq!(finite(f64::INFINITY), 10.0);
        assert_eq!(finite(f64::NEG_INFINITY), -10.0);
        assert_eq!(finite(1.25), 1.25);
    }

    #[test]
    fn identical_windows_yield_identical_features() {
        let window: Vec<_> = (0..10)
            .map(|i| row(i * 60, 85.0 + (i % 3) as f64, 30.0, 180.0))
            .collect();
        assert_eq!(compute(&window), compute(&window));
    }
}

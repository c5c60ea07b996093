//! Rule-based severity per metric.
//!
//! One canonical path per metric per tick:
//! - `Temp_Spread` uses fixed thresholds (5 °C / 8 °C) and nothing else.
//! - A metric with a configured scoring band uses that band (ABS or REL)
//!   against the profile baseline mean.
//! - A ready profile without a band for the metric uses the green-band +
//!   percent-deviation rule (inside band green, ≤3 % green, ≤5 % orange).
//! - Without a ready profile the z-score against the rolling-window
//!   baseline decides.

use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::config::defaults::{
    PCT_GREEN_MAX, PCT_ORANGE_MAX, TEMP_SPREAD_GREEN_MAX, TEMP_SPREAD_ORANGE_MAX,
};
use crate::types::{metrics, BandMode, HistorianRow, ProfileContext, ScoringBand, Severity};

/// Rolling-window baseline: mean/std per metric, operating-point aware.
///
/// Sensor channels are computed over rows near the current screw-speed
/// bucket (±2 rpm) so speed changes do not masquerade as drift; the derived
/// temperature metrics use the whole window.
#[derive(Debug, Clone, Default)]
pub struct RollingBaseline {
    stats: BTreeMap<String, (f64, f64)>,
    pub op_bucket: Option<f64>,
}

impl RollingBaseline {
    pub fn from_window(window: &[HistorianRow]) -> Self {
        let mut baseline = Self::default();
        if window.is_empty() {
            return baseline;
        }

        let current_speed = window[window.len() - 1].screw_speed_rpm;
        let bucket = (current_speed / 2.0).round() * 2.0;
        baseline.op_bucket = Some(bucket);

        let mut op_rows: Vec<&HistorianRow> = window
            .iter()
            .filter(|r| (r.screw_speed_rpm - bucket).abs() <= 2.0)
            .collect();
        if op_rows.is_empty() {
            op_rows = window.iter().collect();
        }
        baseline.fill(&op_rows, window)
    }

    fn fill(mut self, op_rows: &[&HistorianRow], window: &[HistorianRow]) -> Self {
        for metric in metrics::SENSOR_KEYS {
            let values: Vec<f64> = op_rows
                .iter()
                .filter_map(|r| metrics::value_from_row(r, metric))
                .collect();
            if let Some(stats) = mean_std(&values) {
                self.stats.insert(metric.to_string(), stats);
            }
        }
        for metric in [metrics::TEMP_AVG, metrics::TEMP_SPREAD] {
            let values: Vec<f64> = window
                .iter()
                .filter_map(|r| metrics::value_from_row(r, metric))
                .collect();
            if let Some(stats) = mean_std(&values) {
                self.stats.insert(metric.to_string(), stats);
            }
        }
        self
    }

    pub fn mean(&self, metric: &str) -> Option<f64> {
        self.stats.get(metric).map(|(m, _)| *m)
    }

    pub fn std(&self, metric: &str) -> Option<f64> {
        self.stats.get(metric).map(|(_, s)| *s)
    }
}

fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().mean();
    let std = if values.len() > 1 {
        values.iter().std_dev()
    } else {
        0.0
    };
    Some((mean, std))
}

/// Fixed Temp_Spread thresholds; never baseline-driven.
pub fn temp_spread_severity(spread: Option<f64>) -> Severity {
    match spread {
        None => Severity::Unknown,
        Some(s) if s <= TEMP_SPREAD_GREEN_MAX => Severity::Green,
        Some(s) if s <= TEMP_SPREAD_ORANGE_MAX => Severity::Orange,
        Some(_) => Severity::Red,
    }
}

/// Scoring-band severity against a baseline mean.
pub fn band_severity(value: f64, mean: f64, band: &ScoringBand) -> Severity {
    match band.mode {
        BandMode::Abs => {
            let diff = (value - mean).abs();
            match (band.green_limit, band.orange_limit) {
                (Some(green), _) if diff <= green => Severity::Green,
                (_, Some(orange)) if diff <= orange => Severity::Orange,
                _ => Severity::Red,
            }
        }
        BandMode::Rel => {
            if mean == 0.0 {
                return Severity::Unknown;
            }
            let pct = ((value - mean) / mean).abs() * 100.0;
            match (band.green_limit, band.orange_limit) {
                (Some(green), _) if pct <= green => Severity::Green,
                (_, Some(orange)) if pct <= orange => Severity::Orange,
                _ => Severity::Red,
            }
        }
    }
}

/// Green-band + percent rule: inside the band is green; outside it the
/// percent deviation from the baseline mean decides (≤3 % green, ≤5 %
/// orange, else red).
pub fn green_band_severity(
    value: f64,
    mean: f64,
    green_band: Option<(f64, f64)>,
) -> Severity {
    if let Some((lo, hi)) = green_band {
        if value >= lo && value <= hi {
            return Severity::Green;
        }
    }
    if mean == 0.0 {
        return Severity::Unknown;
    }
    let pct = ((value - mean) / mean).abs() * 100.0;
    if pct <= PCT_GREEN_MAX {
        Severity::Green
    } else if pct <= PCT_ORANGE_MAX {
        Severity::Orange
    } else {
        Severity::Red
    }
}

/// Z-score severity against the rolling baseline.
pub fn zscore_severity(value: f64, mean: f64, std: f64) -> Severity {
    if std == 0.0 {
        return Severity::Green;
    }
    let z = ((value - mean) / std).abs();
    if z <= 1.0 {
        Severity::Green
    } else if z <= 2.0 {
        Severity::Orange
    } else {
        Severity::Red
    }
}

/// Canonical rule-based severity for a metric other than Temp_Spread.
pub fn rule_severity(
    metric: &str,
    value: Option<f64>,
    profile: Option<&ProfileContext>,
    rolling: &RollingBaseline,
) -> Severity {
    let Some(value) = value else {
        return Severity::Unknown;
    };

    let ready_profile = profile.filter(|p| p.baseline_ready);
    if let Some(p) = ready_profile {
        if let Some(band) = p.bands.get(metric) {
            let mean = p.baseline_mean(metric).or_else(|| rolling.mean(metric));
            return match mean {
                Some(mean) => band_severity(value, mean, band),
                None => Severity::Unknown,
            };
        }
        if let Some(stats) = p.baselines.get(metric) {
            if let Some(mean) = stats.mean {
                let green_band = match (stats.p05, stats.p95) {
                    (Some(lo), Some(hi)) => Some((lo, hi)),
                    _ => stats.std.map(|std| (mean - std, mean + std)),
                };
                return green_band_severity(value, mean, green_band);
            }
        }
        // Ready profile without stats for this metric: fall through to the
        // rolling-window z-score.
    }

    match (rolling.mean(metric), rolling.std(metric)) {
        (Some(mean), Some(std)) => zscore_severity(value, mean, std),
        _ => Severity::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BaselineStats;
    use chrono::{Duration, TimeZone, Utc};

    fn row(offset_secs: i64, rpm: f64, pressure: f64, temp: f64) -> HistorianRow {
        HistorianRow {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            screw_speed_rpm: rpm,
            pressure_bar: pressure,
            temp_zone1_c: temp,
            temp_zone2_c: temp,
            temp_zone3_c: temp,
            temp_zone4_c: temp,
        }
    }

    #[test]
    fn temp_spread_boundaries() {
        assert_eq!(temp_spread_severity(Some(5.0)), Severity::Green);
        assert_eq!(temp_spread_severity(Some(5.0001)), Severity::Orange);
        assert_eq!(temp_spread_severity(Some(8.0)), Severity::Orange);
        assert_eq!(temp_spread_severity(Some(8.0001)), Severity::Red);
        assert_eq!(temp_spread_severity(None), Severity::Unknown);
    }

    #[test]
    fn abs_band() {
        let band = ScoringBand {
            mode: BandMode::Abs,
            green_limit: Some(1.0),
            orange_limit: Some(2.0),
        };
        assert_eq!(band_severity(30.5, 30.0, &band), Severity::Green);
        assert_eq!(band_severity(31.5, 30.0, &band), Severity::Orange);
        assert_eq!(band_severity(33.0, 30.0, &band), Severity::Red);
    }

    #[test]
    fn rel_band_matches_spec_scenario() {
        // Pressure mean 30.0, REL green 3 %, orange 5 %: 31.4 bar is ~4.67 %.
        let band = ScoringBand {
            mode: BandMode::Rel,
            green_limit: Some(3.0),
            orange_limit: Some(5.0),
        };
        assert_eq!(band_severity(31.4, 30.0, &band), Severity::Orange);
        assert_eq!(band_severity(30.5, 30.0, &band), Severity::Green);
        assert_eq!(band_severity(32.0, 30.0, &band), Severity::Red);
        assert_eq!(band_severity(1.0, 0.0, &band), Severity::Unknown);
    }

    #[test]
    fn green_band_rule() {
        // Inside the band: green regardless of percent deviation.
        assert_eq!(
            green_band_severity(31.0, 30.0, Some((28.0, 32.0))),
            Severity::Green
        );
        // Outside the band: percent rule takes over.
        assert_eq!(
            green_band_severity(31.2, 30.0, Some((29.5, 30.5))),
            Severity::Orange
        );
        assert_eq!(
            green_band_severity(33.0, 30.0, Some((29.5, 30.5))),
            Severity::Red
        );
        assert_eq!(
            green_band_severity(30.6, 30.0, Some((29.5, 30.5))),
            Severity::Green
        );
    }

    #[test]
    fn zscore_fallback() {
        assert_eq!(zscore_severity(30.5, 30.0, 1.0), Severity::Green);
        assert_eq!(zscore_severity(31.5, 30.0, 1.0), Severity::Orange);
        assert_eq!(zscore_severity(33.0, 30.0, 1.0), Severity::Red);
        assert_eq!(zscore_severity(99.0, 30.0, 0.0), Severity::Green);
    }

    #[test]
    fn configured_band_is_the_canonical_path() {
        let mut profile = ProfileContext {
            baseline_ready: true,
            ..ProfileContext::default()
        };
        profile.baselines.insert(
            metrics::PRESSURE.into(),
            BaselineStats {
                mean: Some(30.0),
                std: Some(0.5),
                p05: Some(29.0),
                p95: Some(31.0),
                sample_count: 120,
            },
        );
        profile.bands.insert(
            metrics::PRESSURE.into(),
            ScoringBand {
                mode: BandMode::Rel,
                green_limit: Some(3.0),
                orange_limit: Some(5.0),
            },
        );

        let window: Vec<HistorianRow> = (0..10).map(|i| row(i * 60, 85.0, 30.0, 180.0)).collect();
        let rolling = RollingBaseline::from_window(&window);

        // 31.4 is inside p05..p95? No: band mode wins and says orange.
        let severity = rule_severity(metrics::PRESSURE, Some(31.4), Some(&profile), &rolling);
        assert_eq!(severity, Severity::Orange);
    }

    #[test]
    fn ready_profile_without_band_uses_green_band_rule() {
        let mut profile = ProfileContext {
            baseline_ready: true,
            ..ProfileContext::default()
        };
        profile.baselines.insert(
            metrics::PRESSURE.into(),
            BaselineStats {
                mean: Some(30.0),
                std: Some(0.5),
                p05: Some(29.0),
                p95: Some(31.0),
                sample_count: 120,
            },
        );
        let rolling = RollingBaseline::default();

        assert_eq!(
            rule_severity(metrics::PRESSURE, Some(30.8), Some(&profile), &rolling),
            Severity::Green
        );
        // 31.4: outside p05..p95, ~4.7 % deviation -> orange.
        assert_eq!(
            rule_severity(metrics::PRESSURE, Some(31.4), Some(&profile), &rolling),
            Severity::Orange
        );
    }

    #[test]
    fn no_profile_falls_back_to_rolling_zscore() {
        let window: Vec<HistorianRow> = (0..20)
            .map(|i| row(i * 30, 85.0, 30.0 + (i % 2) as f64, 180.0))
            .collect();
        let rolling = RollingBaseline::from_window(&window);
        let severity = rule_severity(metrics::PRESSURE, Some(30.4), None, &rolling);
        assert_eq!(severity, Severity::Green);

        let severity = rule_severity(metrics::PRESSURE, Some(45.0), None, &rolling);
        assert_eq!(severity, Severity::Red);
    }

    #[test]
    fn missing_value_is_unknown() {
        let rolling = RollingBaseline::default();
        assert_eq!(
            rule_severity(metrics::PRESSURE, None, None, &rolling),
            Severity::Unknown
        );
        assert_eq!(
            rule_severity(metrics::PRESSURE, Some(30.0), None, &rolling),
            Severity::Unknown
        );
    }

    #[test]
    fn rolling_baseline_uses_operating_point_bucket() {
        // 10 rows at ~85 rpm, then a speed change to 100 rpm.
        let mut window: Vec<HistorianRow> =
            (0..10).map(|i| row(i * 60, 85.0, 30.0, 180.0)).collect();
        window.push(row(600, 100.0, 40.0, 180.0));
        let rolling = RollingBaseline::from_window(&window);
        assert_eq!(rolling.op_bucket, Some(100.0));
        // Only the 100-rpm row is in the bucket: pressure mean is 40.
        assert_eq!(rolling.mean(metrics::PRESSURE), Some(40.0));
    }
}

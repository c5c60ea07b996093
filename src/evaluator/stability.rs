//! Stability severity: short-term variance against the learned variance.

use chrono::{DateTime, Duration, Utc};
use statrs::statistics::Statistics;

use crate::config::defaults::{
    STABILITY_GREEN_MAX_RATIO, STABILITY_MIN_SAMPLES, STABILITY_ORANGE_MAX_RATIO,
    STABILITY_WINDOW_MINUTES,
};
use crate::types::{metrics, HistorianRow, ProfileContext, Severity};

use super::scoring::RollingBaseline;

/// Outcome of the stability evaluation for one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StabilityResult {
    pub current_std: Option<f64>,
    pub baseline_std: Option<f64>,
    pub ratio: Option<f64>,
    pub severity: Severity,
}

/// `ratio = current_std / baseline_std` over the 10-minute sliding window.
/// Profile baseline std is preferred; the rolling std is the fallback.
/// Ratio ≤ 1.2 green, ≤ 1.6 orange, above red; missing data unknown.
pub fn evaluate(
    metric: &str,
    window: &[HistorianRow],
    now: DateTime<Utc>,
    profile: Option<&ProfileContext>,
    rolling: &RollingBaseline,
) -> StabilityResult {
    let cutoff = now - Duration::minutes(STABILITY_WINDOW_MINUTES);
    let values: Vec<f64> = window
        .iter()
        .filter(|r| r.timestamp >= cutoff)
        .filter_map(|r| metrics::value_from_row(r, metric))
        .collect();

    if values.len() < STABILITY_MIN_SAMPLES {
        return StabilityResult::default();
    }
    let current_std = values.iter().std_dev();

    let baseline_std = profile
        .filter(|p| p.baseline_ready)
        .and_then(|p| p.baseline_std(metric))
        .or_else(|| rolling.std(metric));

    let Some(baseline_std) = baseline_std.filter(|s| *s > 0.0) else {
        return StabilityResult {
            current_std: Some(current_std),
            ..StabilityResult::default()
        };
    };

    let ratio = current_std / baseline_std;
    let severity = if ratio <= STABILITY_GREEN_MAX_RATIO {
        Severity::Green
    } else if ratio <= STABILITY_ORANGE_MAX_RATIO {
        Severity::Orange
    } else {
        Severity::Red
    };

    StabilityResult {
        current_std: Some(current_std),
        baseline_std: Some(baseline_std),
        ratio: Some(ratio),
        severity,
    }
}

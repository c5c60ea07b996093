//! Evaluator - the four-step decision hierarchy.
//!
//! ```text
//! STEP 1: Machine state gate    (state != PRODUCTION -> neutral result)
//! STEP 2: Rule-based severity   (scoring bands / fixed spread thresholds)
//! STEP 3: Stability indicators  (may only raise a severity)
//! STEP 4: ML advisory           (warning flag only, never changes status)
//! ```
//!
//! The evaluator is pure: it receives the window, the machine state, the
//! profile context, and the extracted ML scores, and returns a fully
//! computed [`Evaluation`]. Persistence and I/O live in the pipeline.

pub mod ml;
pub mod scoring;
pub mod stability;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::defaults::ML_WARNING_THRESHOLD;
use crate::types::{metrics, HistorianRow, MachineState, ProfileContext, Severity};

pub use scoring::RollingBaseline;
pub use stability::StabilityResult;

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Everything one evaluation tick needs.
pub struct EvaluationInput<'a> {
    pub machine_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Rolling window, chronological; the last row is the one scored.
    pub window: &'a [HistorianRow],
    pub state: MachineState,
    pub profile: Option<&'a ProfileContext>,
    /// metric -> anomaly score from recent ML predictions.
    pub ml_scores: BTreeMap<String, f64>,
    /// Overall ML warning from the prediction history.
    pub ml_warning_overall: bool,
}

/// Per-metric evaluation outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricEvaluation {
    pub value: Option<f64>,
    pub rule_severity: Severity,
    pub stability: StabilityResult,
    pub final_severity: Severity,
    pub ml_warning: bool,
    pub explanation: String,
}

/// Result of one evaluation tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub machine_id: Option<Uuid>,
    pub timestamp: Option<DateTime<Utc>>,
    pub machine_state: MachineState,
    pub evaluation_enabled: bool,
    /// metric name -> outcome; empty outside PRODUCTION.
    pub metrics: BTreeMap<String, MetricEvaluation>,
    /// Always computed for display, even outside PRODUCTION.
    pub temp_avg: Option<f64>,
    pub temp_spread: Option<f64>,
    /// Weighted 0-100 risk; None when a component is unknown.
    pub risk_score: Option<u32>,
    pub overall_severity: Severity,
    /// Representative stability severity (pressure first).
    pub stability_state: Severity,
    pub process_status: Severity,
    pub process_status_text: String,
    /// Text from the highest-severity metric.
    pub explanation: String,
    pub ml_warning: bool,
}

// ============================================================================
// Decision hierarchy
// ============================================================================

/// Steps 2-4 for a single metric. Stability may only raise the final
/// severity; the ML score only sets the warning flag.
pub fn apply_decision_hierarchy(
    rule_severity: Severity,
    stability_severity: Severity,
    ml_score: Option<f64>,
) -> (Severity, bool) {
    let mut final_severity = rule_severity;

    if stability_severity.is_known() && stability_severity.code() >= 1 {
        if final_severity == Severity::Green {
            final_severity = stability_severity;
        } else if final_severity.is_known() && stability_severity.code() > final_severity.code() {
            final_severity = stability_severity;
        }
    }

    let ml_warning = ml_score.is_some_and(|s| s > ML_WARNING_THRESHOLD);
    (final_severity, ml_warning)
}

// ============================================================================
// Evaluation
// ============================================================================

/// Run the full evaluation for one tick.
pub fn evaluate(input: &EvaluationInput<'_>) -> Evaluation {
    let latest = input.window.last();
    let temp_avg = latest.map(HistorianRow::temp_avg);
    let temp_spread = latest.map(HistorianRow::temp_spread);

    // STEP 1: machine state gate.
    if !input.state.is_production() {
        return Evaluation {
            machine_id: Some(input.machine_id),
            timestamp: Some(input.timestamp),
            machine_state: input.state,
            evaluation_enabled: false,
            temp_avg,
            temp_spread,
            risk_score: None,
            overall_severity: Severity::Unknown,
            stability_state: Severity::Unknown,
            process_status: Severity::Unknown,
            process_status_text: "System status unknown".into(),
            explanation: format!(
                "[{}] Process evaluation disabled - machine not in PRODUCTION state",
                input.state
            ),
            ml_warning: false,
            ..Evaluation::default()
        };
    }

    let rolling = RollingBaseline::from_window(input.window);
    let mut evaluations: BTreeMap<String, MetricEvaluation> = BTreeMap::new();

    // Six sensor channels plus Temp_Avg through the banded path.
    let mut banded: Vec<&str> = metrics::SENSOR_KEYS.to_vec();
    banded.push(metrics::TEMP_AVG);
    for metric in banded {
        let value = latest.and_then(|row| metrics::value_from_row(row, metric));
        let rule = scoring::rule_severity(metric, value, input.profile, &rolling);
        let stab = stability::evaluate(metric, input.window, input.timestamp, input.profile, &rolling);
        let (final_severity, ml_warning) = apply_decision_hierarchy(
            rule,
            stab.severity,
            input.ml_scores.get(metric).copied(),
        );
        evaluations.insert(
            metric.to_string(),
            MetricEvaluation {
                value,
                rule_severity: rule,
                stability: stab,
                final_severity,
                ml_warning,
                explanation: String::new(),
            },
        );
    }

    // Temp_Spread: fixed thresholds, no stability, no ML.
    let spread_severity = scoring::temp_spread_severity(temp_spread);
    evaluations.insert(
        metrics::TEMP_SPREAD.to_string(),
        MetricEvaluation {
            value: temp_spread,
            rule_severity: spread_severity,
            stability: StabilityResult::default(),
            final_severity: spread_severity,
            ml_warning: false,
            explanation: String::new(),
        },
    );

    // Representative stability: pressure first, else rounded mean.
    let stability_state = representative_stability(&evaluations);

    // Weighted risk score over the four components.
    let s_pressure = final_of(&evaluations, metrics::PRESSURE);
    let s_temp_avg = final_of(&evaluations, metrics::TEMP_AVG);
    let s_temp_spread = final_of(&evaluations, metrics::TEMP_SPREAD);
    let risk_score = if [s_pressure, s_temp_avg, s_temp_spread, stability_state]
        .iter()
        .all(|s| s.is_known())
    {
        let raw = 25 * (s_pressure.code() as i32
            + s_temp_avg.code() as i32
            + s_temp_spread.code() as i32
            + stability_state.code() as i32);
        Some(raw.clamp(0, 100) as u32)
    } else {
        None
    };

    let worst = evaluations
        .values()
        .map(|m| m.final_severity)
        .fold(Severity::Unknown, Severity::worst);

    let (overall_severity, process_status) = match risk_score {
        Some(score) if score <= 33 => (Severity::Green, Severity::Green),
        Some(score) if score <= 66 => (Severity::Orange, Severity::Orange),
        Some(_) => (Severity::Red, Severity::Red),
        None => (worst, worst),
    };

    let process_status_text = process_status_text(process_status).to_string();

    // Explanations: message template first, defaults otherwise.
    for (metric, evaluation) in &mut evaluations {
        evaluation.explanation = explain_metric(
            metric,
            evaluation.final_severity,
            input.profile,
            &rolling,
        );
    }

    let explanation = evaluations
        .iter()
        .filter(|(_, m)| m.final_severity.is_known())
        .max_by_key(|(_, m)| m.final_severity.code())
        .map(|(_, m)| m.explanation.clone())
        .map_or_else(
            || overall_fallback_text(overall_severity).to_string(),
            |text| text,
        );
    let explanation = format!("[PRODUCTION] {explanation}");

    let ml_warning =
        input.ml_warning_overall || evaluations.values().any(|m| m.ml_warning);

    Evaluation {
        machine_id: Some(input.machine_id),
        timestamp: Some(input.timestamp),
        machine_state: input.state,
        evaluation_enabled: true,
        metrics: evaluations,
        temp_avg,
        temp_spread,
        risk_score,
        overall_severity,
        stability_state,
        process_status,
        process_status_text,
        explanation,
        ml_warning,
    }
}

fn final_of(evaluations: &BTreeMap<String, MetricEvaluation>, metric: &str) -> Severity {
    evaluations
        .get(metric)
        .map_or(Severity::Unknown, |m| m.final_severity)
}

/// Pressure stability when defined, otherwise the rounded mean of the
/// defined stability severities.
fn representative_stability(evaluations: &BTreeMap<String, MetricEvaluation>) -> Severity {
    if let Some(pressure) = evaluations.get(metrics::PRESSURE) {
        if pressure.stability.severity.is_known() {
            return pressure.stability.severity;
        }
    }
    let known: Vec<i8> = metrics::STABILITY_METRICS
        .iter()
        .filter_map(|m| evaluations.get(*m))
        .map(|m| m.stability.severity.code())
        .filter(|c| *c >= 0)
        .collect();
    if known.is_empty() {
        return Severity::Unknown;
    }
    let mean = known.iter().map(|c| f64::from(*c)).sum::<f64>() / known.len() as f64;
    Severity::from_code(mean.round() as i8)
}

fn process_status_text(status: Severity) -> &'static str {
    match status {
        Severity::Green => "Process stable",
        Severity::Orange => "Process drifting from baseline",
        Severity::Red => "High risk of instability or scrap",
        Severity::Unknown => "System status unknown",
    }
}

fn overall_fallback_text(severity: Severity) -> &'static str {
    match severity {
        Severity::Green => "All systems operating normally",
        Severity::Orange => "Some metrics require attention",
        Severity::Red => "Critical issues detected - immediate action required",
        Severity::Unknown => "System status unknown",
    }
}

fn explain_metric(
    metric: &str,
    severity: Severity,
    profile: Option<&ProfileContext>,
    rolling: &RollingBaseline,
) -> String {
    if let Some(text) = profile.and_then(|p| p.template(metric, severity)) {
        return text.to_string();
    }

    let mean = profile
        .and_then(|p| p.baseline_mean(metric))
        .or_else(|| rolling.mean(metric));
    let std = profile
        .and_then(|p| p.baseline_std(metric))
        .or_else(|| rolling.std(metric));

    match (severity, mean, std) {
        (Severity::Red, Some(m), Some(s)) => {
            format!("{metric} critically deviates from normal ({m:.1}±{s:.1})")
        }
        (Severity::Orange, Some(m), Some(s)) => {
            format!("{metric} drifting from normal ({m:.1}±{s:.1})")
        }
        (Severity::Red, _, _) => format!("{metric} critically deviates from normal"),
        (Severity::Orange, _, _) => format!("{metric} drifting from normal"),
        (Severity::Green, _, _) => format!("{metric} stable"),
        (Severity::Unknown, _, _) => format!("{metric} unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BandMode, BaselineStats, ScoringBand};
    use chrono::{Duration, TimeZone};

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

    fn production_window(pressure: f64) -> Vec<HistorianRow> {
        (0..12).map(|i| row(i * 60, 85.0, pressure, 180.0)).collect()
    }

    fn ready_profile() -> ProfileContext {
        let mut profile = ProfileContext {
            profile_id: Some(Uuid::new_v4()),
            material_id: Some("Material 1".into()),
            baseline_ready: true,
            ..ProfileContext::default()
        };
        for (metric, mean, std) in [
            (metrics::SCREW_SPEED, 85.0, 1.0),
            (metrics::PRESSURE, 30.0, 0.4),
            (metrics::TEMP_ZONE1, 180.0, 0.8),
            (metrics::TEMP_ZONE2, 181.0, 0.8),
            (metrics::TEMP_ZONE3, 179.0, 0.8),
            (metrics::TEMP_ZONE4, 180.0, 0.8),
            (metrics::TEMP_AVG, 180.0, 0.6),
        ] {
            profile.baselines.insert(
                metric.to_string(),
                BaselineStats {
                    mean: Some(mean),
                    std: Some(std),
                    p05: Some(mean - 2.0 * std),
                    p95: Some(mean + 2.0 * std),
                    sample_count: 150,
                },
            );
        }
        profile.bands.insert(
            metrics::PRESSURE.to_string(),
            ScoringBand {
                mode: BandMode::Rel,
                green_limit: Some(3.0),
                orange_limit: Some(5.0),
            },
        );
        profile
    }

    fn input<'a>(
        window: &'a [HistorianRow],
        state: MachineState,
        profile: Option<&'a ProfileContext>,
    ) -> EvaluationInput<'a> {
        EvaluationInput {
            machine_id: Uuid::new_v4(),
            timestamp: window.last().map_or_else(Utc::now, |r| r.timestamp),
            window,
            state,
            profile,
            ml_scores: BTreeMap::new(),
            ml_warning_overall: false,
        }
    }

    #[test]
    fn non_production_is_gated_neutral() {
        let window = production_window(30.0);
        let result = evaluate(&input(&window, MachineState::Idle, None));
        assert!(!result.evaluation_enabled);
        assert!(result.metrics.is_empty());
        assert_eq!(result.overall_severity, Severity::Unknown);
        assert_eq!(result.risk_score, None);
        assert!(!result.ml_warning);
        // Display metrics still computed.
        assert!(result.temp_avg.is_some());
        assert!(result.temp_spread.is_some());
        assert!(result.explanation.contains("IDLE"));
    }

    #[test]
    fn stable_production_is_green() {
        let window = production_window(30.0);
        let profile = ready_profile();
        let result = evaluate(&input(&window, MachineState::Production, Some(&profile)));
        assert!(result.evaluation_enabled);
        assert_eq!(result.process_status, Severity::Green);
        assert_eq!(result.process_status_text, "Process stable");
        assert_eq!(result.risk_score, Some(0));
    }

    #[test]
    fn rule_based_orange_drives_overall() {
        // Pressure drifts from the 30.0 baseline to 31.4 (~4.67 % with a
        // REL 3/5 band): rule orange, stability mildly elevated.
        let window: Vec<HistorianRow> = (0..12)
            .map(|i| {
                let pressure = if i < 10 { 30.0 } else { 31.4 };
                row(i * 60, 85.0, pressure, 180.0)
            })
            .collect();
        let profile = ready_profile();
        let result = evaluate(&input(&window, MachineState::Production, Some(&profile)));

        let pressure = &result.metrics[metrics::PRESSURE];
        assert_eq!(pressure.rule_severity, Severity::Orange);
        assert_eq!(pressure.final_severity, Severity::Orange);
        let score = result.risk_score.unwrap();
        assert!((34..=66).contains(&score), "risk score {score}");
        assert_eq!(result.process_status, Severity::Orange);
        assert_eq!(result.process_status_text, "Process drifting from baseline");
    }

    #[test]
    fn stability_upgrades_green_rule() {
        // Value ends inside the band, but the window oscillates hard.
        let mut window: Vec<HistorianRow> = (0..12)
            .map(|i| {
                row(
                    i * 60,
                    85.0,
                    if i % 2 == 0 { 29.2 } else { 30.8 },
                    180.0,
                )
            })
            .collect();
        window.push(row(720, 85.0, 30.0, 180.0));
        let profile = ready_profile();
        let result = evaluate(&input(&window, MachineState::Production, Some(&profile)));

        let pressure = &result.metrics[metrics::PRESSURE];
        assert_eq!(pressure.rule_severity, Severity::Green);
        assert!(pressure.stability.severity.code() >= 1);
        assert_eq!(pressure.final_severity, pressure.stability.severity);
        assert!(result.risk_score.unwrap() > 0);
    }

    #[test]
    fn ml_advisory_never_changes_status() {
        let window = production_window(30.0);
        let profile = ready_profile();
        let mut inp = input(&window, MachineState::Production, Some(&profile));
        inp.ml_scores.insert(metrics::PRESSURE.to_string(), 0.85);
        let result = evaluate(&inp);

        let pressure = &result.metrics[metrics::PRESSURE];
        assert_eq!(pressure.final_severity, Severity::Green);
        assert!(pressure.ml_warning);
        assert!(result.ml_warning);
        assert_eq!(result.process_status, Severity::Green);
        assert_eq!(result.process_status_text, "Process stable");
        assert_eq!(result.risk_score, Some(0));
    }

    #[test]
    fn hierarchy_rules() {
        // Stability raises green.
        assert_eq!(
            apply_decision_hierarchy(Severity::Green, Severity::Orange, None),
            (Severity::Orange, false)
        );
        // Stability raises orange to red.
        assert_eq!(
            apply_decision_hierarchy(Severity::Orange, Severity::Red, None),
            (Severity::Red, false)
        );
        // Stability never lowers.
        assert_eq!(
            apply_decision_hierarchy(Severity::Red, Severity::Green, None),
            (Severity::Red, false)
        );
        // Unknown rule stays unknown.
        assert_eq!(
            apply_decision_hierarchy(Severity::Unknown, Severity::Orange, None),
            (Severity::Unknown, false)
        );
        // ML sets the flag only.
        assert_eq!(
            apply_decision_hierarchy(Severity::Green, Severity::Unknown, Some(0.9)),
            (Severity::Green, true)
        );
        assert_eq!(
            apply_decision_hierarchy(Severity::Green, Severity::Unknown, Some(0.7)),
            (Severity::Green, false)
        );
    }

    #[test]
    fn message_template_feeds_explanation() {
        let window = production_window(31.4);
        let mut profile = ready_profile();
        profile.templates.insert(
            "Pressure_bar:ORANGE".into(),
            "Pressure drifting - inspect the die".into(),
        );
        let result = evaluate(&input(&window, MachineState::Production, Some(&profile)));
        assert!(result.explanation.contains("Pressure drifting - inspect the die"));
        assert!(result.explanation.starts_with("[PRODUCTION]"));
    }

    #[test]
    fn identical_input_is_deterministic() {
        let window = production_window(31.4);
        let profile = ready_profile();
        let machine_id = Uuid::new_v4();
        let make = || {
            let mut i = input(&window, MachineState::Production, Some(&profile));
            i.machine_id = machine_id;
            i
        };
        let a = evaluate(&make());
        let b = evaluate(&make());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}

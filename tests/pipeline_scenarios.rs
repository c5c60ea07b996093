//! End-to-end scenarios over the store-free pipeline components:
//! detector -> evaluator -> incident policy, driven by synthetic
//! historian data.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use extrusight::evaluator::{self, EvaluationInput};
use extrusight::historian::{FetchMode, HistorianSource, ReplaySource, RollingWindow};
use extrusight::incident::{IncidentAction, IncidentManager, WearProfile};
use extrusight::profiles::{collect_gate, stats as baseline_stats, CollectRefusal};
use extrusight::types::{
    metrics, BandMode, BaselineStats, HistorianRow, MachineState, Profile, ProfileContext,
    ScoringBand, SensorReading, Severity, StateThresholds,
};
use extrusight::{MachineStateDetector, Prediction};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap()
}

fn row(offset_secs: i64, rpm: f64, pressure: f64, temp: f64) -> HistorianRow {
    HistorianRow {
        timestamp: base_time() + Duration::seconds(offset_secs),
        screw_speed_rpm: rpm,
        pressure_bar: pressure,
        temp_zone1_c: temp,
        temp_zone2_c: temp + 0.5,
        temp_zone3_c: temp - 0.5,
        temp_zone4_c: temp,
    }
}

fn detector() -> MachineStateDetector {
    MachineStateDetector::new(Uuid::new_v4(), StateThresholds::default())
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
        (metrics::TEMP_ZONE2, 180.5, 0.8),
        (metrics::TEMP_ZONE3, 179.5, 0.8),
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

fn evaluate_window(
    window: &[HistorianRow],
    state: MachineState,
    profile: Option<&ProfileContext>,
    ml_scores: BTreeMap<String, f64>,
) -> evaluator::Evaluation {
    evaluator::evaluate(&EvaluationInput {
        machine_id: Uuid::new_v4(),
        timestamp: window.last().map_or_else(Utc::now, |r| r.timestamp),
        window,
        state,
        profile,
        ml_scores,
        ml_warning_overall: false,
    })
}

// ============================================================================
// Scenario 1: cold machine to warm idle
// ============================================================================

#[test]
fn cold_machine_heats_up_into_idle() {
    let mut det = detector();
    let mut states_seen = Vec::new();

    // 30 minutes: temperatures rise 45 -> 190 °C at 30 s cadence, then
    // plateau. No rotation, no pressure.
    for i in 0..60 {
        let temp = 45.0 + (i as f64) * 2.5;
        let update = det.add_reading(SensorReading::from_row(&row(i * 30, 0.0, 0.2, temp.min(190.0))));
        states_seen.push(update.info.state);
    }
    for i in 60..80 {
        let update = det.add_reading(SensorReading::from_row(&row(i * 30, 0.0, 0.2, 190.0)));
        states_seen.push(update.info.state);
    }

    assert!(
        states_seen.contains(&MachineState::Heating),
        "HEATING never reported during the rise: {states_seen:?}"
    );
    assert_eq!(
        *states_seen.last().unwrap(),
        MachineState::Idle,
        "flat warm machine should settle in IDLE"
    );
    assert!(
        !states_seen.contains(&MachineState::Production),
        "no production without rotation"
    );

    // Non-PRODUCTION gate: neutral evaluation, nothing scored.
    let window: Vec<HistorianRow> = (0..10).map(|i| row(2400 + i * 30, 0.0, 0.2, 190.0)).collect();
    let evaluation = evaluate_window(&window, MachineState::Idle, None, BTreeMap::new());
    assert!(!evaluation.evaluation_enabled);
    assert!(evaluation.metrics.is_empty());
    assert_eq!(evaluation.overall_severity, Severity::Unknown);
    assert!(evaluation.temp_avg.is_some());
}

// ============================================================================
// Scenario 2: production entry and baseline learning
// ============================================================================

#[test]
fn production_entry_gates_baseline_collection() {
    let mut det = detector();

    // Warm idle history, then steady production readings every 3 s.
    for i in 0..20 {
        det.add_reading(SensorReading::from_row(&row(i * 3, 0.0, 0.8, 180.0)));
    }
    let mut entered_at = None;
    for i in 20..220 {
        let update = det.add_reading(SensorReading::from_row(&row(i * 3, 85.0, 30.0, 180.0)));
        if update.info.state == MachineState::Production && entered_at.is_none() {
            entered_at = Some(i);
        }
    }
    let entered_at = entered_at.expect("production never entered");
    assert!(
        entered_at >= 29,
        "production entered after only {} qualifying samples",
        entered_at - 20
    );
    assert!(det.is_in_production());

    // The learning gate: PRODUCTION plus learning flag plus tracked metric.
    let learning = Profile {
        id: Uuid::new_v4(),
        machine_id: Some(Uuid::new_v4()),
        material_id: "Material 1".into(),
        is_active: true,
        baseline_learning: true,
        baseline_ready: false,
        created_at: Utc::now(),
    };
    assert!(collect_gate(&learning, MachineState::Production, metrics::PRESSURE).is_ok());
    assert_eq!(
        collect_gate(&learning, MachineState::Idle, metrics::PRESSURE),
        Err(CollectRefusal::NotInProduction)
    );
    assert_eq!(
        collect_gate(&learning, MachineState::Production, "Vibration_mm_s"),
        Err(CollectRefusal::UnknownMetric)
    );

    let finished = Profile {
        baseline_learning: false,
        ..learning
    };
    assert_eq!(
        collect_gate(&finished, MachineState::Production, metrics::PRESSURE),
        Err(CollectRefusal::NotLearning)
    );
}

#[test]
fn finalized_baseline_matches_collected_samples() {
    // 600 production ticks: every tick contributes one sample per metric.
    let samples: Vec<f64> = (0..600)
        .map(|i| 30.0 + ((i % 9) as f64 - 4.0) * 0.1)
        .collect();
    let expected_mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;

    let stats = baseline_stats::finalize(&samples).expect("stats");
    assert!((stats.mean.unwrap() - expected_mean).abs() < 1e-6);
    assert_eq!(stats.sample_count, 600);
    assert!(stats.std.unwrap() > 0.0);
    assert!(stats.p05.unwrap() <= stats.mean.unwrap());
    assert!(stats.p95.unwrap() >= stats.mean.unwrap());
}

// ============================================================================
// Scenario 3: rule-based orange
// ============================================================================

#[test]
fn pressure_drift_yields_orange_process_status() {
    let profile = ready_profile();
    let window: Vec<HistorianRow> = (0..12)
        .map(|i| {
            let pressure = if i < 10 { 30.0 } else { 31.4 };
            row(i * 60, 85.0, pressure, 180.0)
        })
        .collect();

    let evaluation = evaluate_window(&window, MachineState::Production, Some(&profile), BTreeMap::new());

    assert_eq!(
        evaluation.metrics[metrics::PRESSURE].final_severity,
        Severity::Orange
    );
    let risk = evaluation.risk_score.expect("risk score");
    assert!((34..=66).contains(&risk), "risk {risk}");
    assert_eq!(evaluation.process_status, Severity::Orange);
    assert_eq!(
        evaluation.process_status_text,
        "Process drifting from baseline"
    );
}

// ============================================================================
// Scenario 4: stability upgrade
// ============================================================================

#[test]
fn unstable_pressure_upgrades_green_rule() {
    let profile = ready_profile();
    // Oscillating pressure, final value dead on the baseline mean.
    let mut window: Vec<HistorianRow> = (0..12)
        .map(|i| row(i * 60, 85.0, if i % 2 == 0 { 29.3 } else { 30.7 }, 180.0))
        .collect();
    window.push(row(720, 85.0, 30.0, 180.0));

    let evaluation = evaluate_window(&window, MachineState::Production, Some(&profile), BTreeMap::new());
    let pressure = &evaluation.metrics[metrics::PRESSURE];

    assert_eq!(pressure.rule_severity, Severity::Green);
    assert!(pressure.stability.severity.code() >= 1, "stability not elevated");
    assert_eq!(pressure.final_severity, pressure.stability.severity);
    assert!(evaluation.risk_score.expect("risk") > 0);
}

// ============================================================================
// Scenario 5: ML advisory only
// ============================================================================

#[test]
fn ml_advisory_raises_warning_without_status_change() {
    let profile = ready_profile();
    let window: Vec<HistorianRow> = (0..12).map(|i| row(i * 60, 85.0, 30.0, 180.0)).collect();

    let mut ml_scores = BTreeMap::new();
    ml_scores.insert(metrics::PRESSURE.to_string(), 0.85);

    let evaluation = evaluate_window(&window, MachineState::Production, Some(&profile), ml_scores);
    let pressure = &evaluation.metrics[metrics::PRESSURE];

    assert_eq!(pressure.final_severity, Severity::Green);
    assert!(pressure.ml_warning);
    assert!(evaluation.ml_warning);
    assert_eq!(evaluation.process_status, Severity::Green);
    assert_eq!(evaluation.process_status_text, "Process stable");
}

#[test]
fn ml_scores_extracted_from_prediction_history() {
    let prediction = Prediction {
        id: Uuid::new_v4(),
        machine_id: Uuid::new_v4(),
        sensor_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        prediction: "anomaly".into(),
        status: "anomaly".into(),
        score: 0.85,
        confidence: 0.9,
        anomaly_type: Some("drift".into()),
        model_version: "if-2.0".into(),
        remaining_useful_life: None,
        response_time_ms: 20.0,
        contributing_features: BTreeMap::from([(metrics::PRESSURE.to_string(), 0.85)]),
        metadata: serde_json::json!({"anomaly_score": 0.85}),
    };
    let (scores, overall) = evaluator::ml::ml_scores(&[prediction]);
    assert_eq!(scores[metrics::PRESSURE], 0.85);
    assert!(overall);
}

// ============================================================================
// Scenario 6: critical incident and calm dedup
// ============================================================================

#[test]
fn advanced_wear_produces_one_alarm_then_recovers() {
    let mut manager = IncidentManager::default();
    let machine_id = Uuid::new_v4();
    let key = format!("{machine_id}:profile2:advanced_wear");

    // Profile 2 stream every 10 s for 90 s: exactly one EnsureAlarm plan.
    let mut planned = Vec::new();
    for i in 0..10 {
        let actions = manager.observe_profile(
            machine_id,
            WearProfile::AdvancedWear,
            base_time() + Duration::seconds(i * 10),
        );
        if let Some(IncidentAction::EnsureAlarm { incident_key, create_ticket, dedup_forever, .. }) =
            actions.first()
        {
            planned.push((incident_key.clone(), *create_ticket, *dedup_forever));
            manager.note_alarm_created(incident_key, base_time() + Duration::seconds(i * 10));
        }
    }
    assert_eq!(planned.len(), 1, "exactly one alarm planned: {planned:?}");
    assert_eq!(planned[0], (key.clone(), true, true));

    // Another hour of profile 2: the cooldown keeps the plan silent, and
    // the dedup-forever marker means the store would refuse anyway.
    let actions = manager.observe_profile(
        machine_id,
        WearProfile::AdvancedWear,
        base_time() + Duration::seconds(600),
    );
    assert!(actions.is_empty());

    // Recovery: profile 0 held for 60 s resolves with the recovery note.
    manager.observe_profile(machine_id, WearProfile::Baseline, base_time() + Duration::seconds(3700));
    let actions = manager.observe_profile(
        machine_id,
        WearProfile::Baseline,
        base_time() + Duration::seconds(3700 + 61),
    );
    assert_eq!(
        actions,
        vec![IncidentAction::ResolveIncidents {
            note: "Recovered to profile 0 (stable)".into()
        }]
    );
}

// ============================================================================
// Idempotence: poller restart never re-emits processed rows
// ============================================================================

#[tokio::test]
async fn high_water_mark_prevents_reemission() {
    let rows: Vec<HistorianRow> = (0..5).map(|i| row(i * 60, 85.0, 30.0, 180.0)).collect();
    let high_water = rows[4].timestamp;

    let source = ReplaySource::new(rows.clone(), 100);
    let first = source
        .fetch_rows(FetchMode::ColdStart { window_minutes: 10 }, 100)
        .await
        .unwrap();
    assert_eq!(first.len(), 5);

    // A "restarted" source over the same table with the persisted
    // high-water mark yields nothing new.
    let restarted = ReplaySource::new(rows, 100);
    let replay = restarted
        .fetch_rows(FetchMode::Incremental { high_water }, 100)
        .await
        .unwrap();
    assert!(replay.is_empty());
}

#[test]
fn rolling_window_drops_duplicates_and_old_rows() {
    let mut window = RollingWindow::new(10);
    window.extend((0..5).map(|i| row(i * 60, 85.0, 30.0, 180.0)).collect());
    assert_eq!(window.len(), 5);

    // Duplicate delivery is suppressed.
    assert_eq!(
        window.extend((0..5).map(|i| row(i * 60, 85.0, 30.0, 180.0)).collect()),
        0
    );

    // A row 11 minutes ahead trims everything older than the span.
    window.extend(vec![row(4 * 60 + 11 * 60, 85.0, 30.0, 180.0)]);
    let rows = window.rows();
    assert!(rows
        .windows(2)
        .all(|p| p[0].timestamp < p[1].timestamp));
    assert!(rows[0].timestamp >= rows.last().unwrap().timestamp - Duration::minutes(10));
}

//! Wear-profile classification from short-term trends.
//!
//! A sliding 10-minute window of canonical variables per machine feeds a
//! conservative trend classifier: least-squares slopes, a normalized stress
//! level, and a slowly moving wear index. The output is one of the four
//! wear profiles driving the incident policy. Escalation is trend-based and
//! deliberately calm - short windows buffer to baseline unless a hard fault
//! range is breached.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

use super::WearProfile;

/// Canonical variables the classifier understands.
pub const CANONICAL_VARS: [&str; 4] = ["temperature", "motor_current", "pressure", "vibration"];

/// Operating ranges used for classifier reasoning only; they never raise
/// alarms directly.
#[derive(Debug, Clone, Copy)]
pub struct OperatingRanges {
    pub temperature_fault: (f64, f64),
    pub motor_current_warning: (f64, f64),
    pub motor_current_fault_hi: f64,
    pub pressure_warning: (f64, f64),
    pub pressure_fault_hi: f64,
    pub vibration_warning: (f64, f64),
    pub vibration_fault_hi: f64,
    pub wear_index_degrading: (f64, f64),
}

impl Default for OperatingRanges {
    fn default() -> Self {
        Self {
            temperature_fault: (160.0, 245.0),
            motor_current_warning: (30.0, 36.0),
            motor_current_fault_hi: 38.0,
            pressure_warning: (145.0, 170.0),
            pressure_fault_hi: 180.0,
            vibration_warning: (2.1, 4.0),
            vibration_fault_hi: 4.5,
            wear_index_degrading: (0.4, 0.7),
        }
    }
}

/// Per-minute slope thresholds; deliberately conservative.
const SLOPE_MOTOR_CURRENT: f64 = 0.20;
const SLOPE_PRESSURE: f64 = 1.00;
const SLOPE_VIBRATION: f64 = 0.05;
const SLOPE_TEMPERATURE: f64 = 0.50;

const WINDOW_MINUTES: i64 = 10;
const MIN_WINDOW_MINUTES_FOR_TRENDS: f64 = 5.0;
const EVAL_THROTTLE_SECONDS: i64 = 20;

/// Wear-index dynamics per minute.
const WEAR_INCREASE_RATE: f64 = 0.004;
const WEAR_DECAY_RATE: f64 = 0.0015;

/// Classifier output for one machine.
#[derive(Debug, Clone)]
pub struct WearDecision {
    pub profile: WearProfile,
    pub confidence: f64,
    pub reason: String,
    pub wear_index: f64,
    pub evidence: BTreeMap<String, f64>,
}

#[derive(Default)]
struct MachineTrendWindow {
    series: HashMap<&'static str, VecDeque<(DateTime<Utc>, f64)>>,
    wear_index: f64,
    last_eval_at: Option<DateTime<Utc>>,
}

/// Trend-based wear classifier over all machines.
#[derive(Default)]
pub struct WearClassifier {
    ranges: OperatingRanges,
    windows: HashMap<Uuid, MachineTrendWindow>,
}

impl WearClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.windows.clear();
    }

    /// Observe one canonical variable value for a machine.
    pub fn observe(&mut self, machine_id: Uuid, var: &str, value: f64, timestamp: DateTime<Utc>) {
        let Some(&key) = CANONICAL_VARS.iter().find(|v| **v == var) else {
            return;
        };
        let window = self.windows.entry(machine_id).or_default();
        window
            .series
            .entry(key)
            .or_default()
            .push_back((timestamp, value));

        let cutoff = timestamp - Duration::minutes(WINDOW_MINUTES);
        for series in window.series.values_mut() {
            while matches!(series.front(), Some((ts, _)) if *ts < cutoff) {
                series.pop_front();
            }
        }
    }

    /// Classify the machine; throttled to once per 20 s per machine.
    pub fn decide(&mut self, machine_id: Uuid, now: DateTime<Utc>) -> Option<WearDecision> {
        let ranges = self.ranges;
        let window = self.windows.entry(machine_id).or_default();

        if let Some(last) = window.last_eval_at {
            if (now - last).num_seconds() < EVAL_THROTTLE_SECONDS {
                return None;
            }
        }
        window.last_eval_at = Some(now);

        let latest = |name: &str| -> Option<f64> {
            window.series.get(name).and_then(|s| s.back()).map(|(_, v)| *v)
        };
        let temperature = latest("temperature");
        let motor_current = latest("motor_current");
        let pressure = latest("pressure");
        let vibration = latest("vibration");

        let oldest = window
            .series
            .values()
            .filter_map(|s| s.front())
            .map(|(ts, _)| *ts)
            .min();
        let window_minutes =
            oldest.map_or(0.0, |ts| (now - ts).num_seconds() as f64 / 60.0);

        let slope = |name: &str| -> f64 {
            window
                .series
                .get(name)
                .and_then(|s| slope_per_minute(s))
                .unwrap_or(0.0)
        };
        let slope_mc = slope("motor_current");
        let slope_p = slope("pressure");
        let slope_v = slope("vibration");
        let slope_t = slope("temperature");

        let fault = fault_breach(&ranges, temperature, motor_current, pressure, vibration);

        let stress = normalized_stress(&ranges, motor_current, pressure, vibration);
        let dt_minutes = window
            .series
            .values()
            .find(|s| s.len() >= 2)
            .map_or(1.0, |s| {
                let n = s.len();
                ((s[n - 1].0 - s[n - 2].0).num_seconds() as f64 / 60.0).max(0.1)
            });
        window.wear_index = update_wear_index(window.wear_index, stress, dt_minutes);

        let mut evidence = BTreeMap::new();
        evidence.insert("window_minutes".into(), round4(window_minutes));
        evidence.insert("slope_motor_current_per_min".into(), round4(slope_mc));
        evidence.insert("slope_pressure_per_min".into(), round4(slope_p));
        evidence.insert("slope_vibration_per_min".into(), round4(slope_v));
        evidence.insert("slope_temperature_per_min".into(), round4(slope_t));
        evidence.insert("stress".into(), round4(stress));
        evidence.insert("wear_index".into(), round4(window.wear_index));

        let mut trending = 0;
        if slope_mc >= SLOPE_MOTOR_CURRENT {
            trending += 1;
        }
        if slope_p >= SLOPE_PRESSURE {
            trending += 1;
        }
        if slope_v >= SLOPE_VIBRATION {
            trending += 1;
        }
        if slope_t >= SLOPE_TEMPERATURE {
            trending += 1;
        }

        let (profile, confidence, reason) = if fault {
            (
                WearProfile::Fault,
                0.92,
                "Fault threshold breach detected".to_string(),
            )
        } else if trending >= 3 {
            (
                WearProfile::Fault,
                0.88,
                "Strong correlated abnormal trends across key variables".to_string(),
            )
        } else if trending >= 2 {
            if window.wear_index >= ranges.wear_index_degrading.1 {
                (
                    WearProfile::AdvancedWear,
                    0.78,
                    "Sustained drift with elevated wear index".to_string(),
                )
            } else {
                (
                    WearProfile::EarlyWear,
                    0.70,
                    "Degradation/drift: sustained upward trends in at least two key variables"
                        .to_string(),
                )
            }
        } else {
            (
                WearProfile::Baseline,
                0.75,
                "Stable operation within expected behaviour".to_string(),
            )
        };

        // Short windows buffer trend-based escalation; hard faults pass.
        if window_minutes < MIN_WINDOW_MINUTES_FOR_TRENDS
            && profile != WearProfile::Baseline
            && !fault
        {
            return Some(WearDecision {
                profile: WearProfile::Baseline,
                confidence: 0.65,
                reason: "Insufficient history for trend-based escalation (buffering)".into(),
                wear_index: window.wear_index,
                evidence,
            });
        }

        Some(WearDecision {
            profile,
            confidence,
            reason,
            wear_index: window.wear_index,
            evidence,
        })
    }
}

/// Least-squares slope in units per minute; None below three points.
fn slope_per_minute(points: &VecDeque<(DateTime<Utc>, f64)>) -> Option<f64> {
    if points.len() < 3 {
        return None;
    }
    let t0 = points[0].0;
    let (mut sx, mut sy) = (0.0, 0.0);
    let n = points.len() as f64;
    let xs: Vec<f64> = points
        .iter()
        .map(|(ts, _)| (*ts - t0).num_seconds() as f64 / 60.0)
        .collect();
    let ys: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    for (x, y) in xs.iter().zip(ys.iter()) {
        sx += x;
        sy += y;
    }
    let x_mean = sx / n;
    let y_mean = sy / n;
    let mut numer = 0.0;
    let mut denom = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        numer += (x - x_mean) * (y - y_mean);
        denom += (x - x_mean).powi(2);
    }
    if denom <= 1e-9 {
        return None;
    }
    Some(numer / denom)
}

fn fault_breach(
    ranges: &OperatingRanges,
    temperature: Option<f64>,
    motor_current: Option<f64>,
    pressure: Option<f64>,
    vibration: Option<f64>,
) -> bool {
    if let Some(t) = temperature {
        if t < ranges.temperature_fault.0 || t > ranges.temperature_fault.1 {
            return true;
        }
    }
    if motor_current.is_some_and(|v| v > ranges.motor_current_fault_hi) {
        return true;
    }
    if pressure.is_some_and(|v| v > ranges.pressure_fault_hi) {
        return true;
    }
    if vibration.is_some_and(|v| v > ranges.vibration_fault_hi) {
        return true;
    }
    false
}

/// Stress in [0, 1] mapped linearly across the warning-to-fault span.
fn normalized_stress(
    ranges: &OperatingRanges,
    motor_current: Option<f64>,
    pressure: Option<f64>,
    vibration: Option<f64>,
) -> f64 {
    let norm = |v: Option<f64>, warn_lo: f64, fault_hi: f64| -> f64 {
        match v {
            None => 0.0,
            Some(v) if v <= warn_lo => 0.0,
            Some(v) if v >= fault_hi => 1.0,
            Some(v) => (v - warn_lo) / (fault_hi - warn_lo).max(1e-6),
        }
    };
    let s_mc = norm(
        motor_current,
        ranges.motor_current_warning.0,
        ranges.motor_current_fault_hi,
    );
    let s_p = norm(pressure, ranges.pressure_warning.0, ranges.pressure_fault_hi);
    let s_v = norm(
        vibration,
        ranges.vibration_warning.0,
        ranges.vibration_fault_hi,
    );
    ((s_mc + s_p + s_v) / 3.0).clamp(0.0, 1.0)
}

/// Wear rises slowly under stress and decays slowly when stable.
fn update_wear_index(current: f64, stress: f64, dt_minutes: f64) -> f64 {
    let inc = WEAR_INCREASE_RATE * stress * dt_minutes;
    let dec = WEAR_DECAY_RATE * (1.0 - stress) * dt_minutes;
    (current + inc - dec).clamp(0.0, 1.0)
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn stable_feed_stays_baseline() {
        let mut c = WearClassifier::new();
        let id = Uuid::new_v4();
        for i in 0..20 {
            let ts = base() + Duration::seconds(i * 30);
            c.observe(id, "temperature", 200.0, ts);
            c.observe(id, "pressure", 120.0, ts);
        }
        let decision = c
            .decide(id, base() + Duration::seconds(20 * 30))
            .expect("decision");
        assert_eq!(decision.profile, WearProfile::Baseline);
    }

    #[test]
    fn fault_breach_escalates_immediately() {
        let mut c = WearClassifier::new();
        let id = Uuid::new_v4();
        let ts = base();
        c.observe(id, "temperature", 250.0, ts);
        c.observe(id, "pressure", 100.0, ts);
        let decision = c.decide(id, ts).expect("decision");
        assert_eq!(decision.profile, WearProfile::Fault);
        assert!(decision.reason.contains("Fault threshold breach"));
    }

    #[test]
    fn trend_escalation_needs_a_long_enough_window() {
        let mut c = WearClassifier::new();
        let id = Uuid::new_v4();
        // Steep pressure + temperature rise over only 3 minutes.
        for i in 0..6 {
            let ts = base() + Duration::seconds(i * 30);
            c.observe(id, "pressure", 120.0 + i as f64 * 2.0, ts);
            c.observe(id, "temperature", 200.0 + i as f64 * 1.0, ts);
        }
        let decision = c.decide(id, base() + Duration::seconds(6 * 30)).expect("decision");
        assert_eq!(decision.profile, WearProfile::Baseline);
        assert!(decision.reason.contains("Insufficient history"));
    }

    #[test]
    fn sustained_two_variable_drift_is_early_wear() {
        let mut c = WearClassifier::new();
        let id = Uuid::new_v4();
        // 8 minutes of correlated pressure (+1.5 bar/min) and temperature
        // (+0.8 °C/min) rise.
        for i in 0..16 {
            let ts = base() + Duration::seconds(i * 30);
            c.observe(id, "pressure", 120.0 + i as f64 * 0.75, ts);
            c.observe(id, "temperature", 200.0 + i as f64 * 0.4, ts);
        }
        let decision = c.decide(id, base() + Duration::seconds(16 * 30)).expect("decision");
        assert_eq!(decision.profile, WearProfile::EarlyWear);
    }

    #[test]
    fn decisions_are_throttled() {
        let mut c = WearClassifier::new();
        let id = Uuid::new_v4();
        let ts = base();
        c.observe(id, "pressure", 120.0, ts);
        assert!(c.decide(id, ts).is_some());
        assert!(c.decide(id, ts + Duration::seconds(5)).is_none());
        assert!(c.decide(id, ts + Duration::seconds(25)).is_some());
    }

    #[test]
    fn unknown_variables_are_ignored() {
        let mut c = WearClassifier::new();
        let id = Uuid::new_v4();
        c.observe(id, "torque", 55.0, base());
        let decision = c.decide(id, base()).expect("decision");
        assert_eq!(decision.profile, WearProfile::Baseline);
    }
}

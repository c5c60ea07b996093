//! Five-state machine classifier with debounce and hysteresis.
//!
//! Classification is rule-ordered: PRODUCTION (primary, then fallback),
//! OFF, COOLING, HEATING, IDLE, default OFF. Hysteresis keeps the reported
//! state from flapping: PRODUCTION entry needs a dwell window or a
//! qualifying sample tail, PRODUCTION exit waits until the criteria have
//! been unmet long enough, everything else debounces.
//!
//! All dwell logic runs on reading timestamps, so historical replay and
//! tests behave exactly like live data.

use chrono::{DateTime, Duration, Utc};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::defaults::{READING_BUFFER_CAP, STATE_STALE_SECS, TEMP_HISTORY_CAP};
use crate::types::{
    DerivedMetrics, MachineState, MachineStateInfo, SensorReading, StateThresholds,
    StateTransition,
};

/// Result of feeding one reading to the detector.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub info: MachineStateInfo,
    /// Present when the reported state changed on this reading.
    pub transition: Option<StateTransition>,
}

pub struct MachineStateDetector {
    machine_id: Uuid,
    thresholds: StateThresholds,
    reading_buffer: VecDeque<SensorReading>,
    temp_history: VecDeque<(DateTime<Utc>, f64)>,
    current: MachineStateInfo,
    /// Candidate state awaiting its dwell window, with first-seen time.
    pending: Option<(MachineState, DateTime<Utc>)>,
    /// Last time the production criteria (primary or fallback) were met.
    production_last_met: Option<DateTime<Utc>>,
}

impl MachineStateDetector {
    pub fn new(machine_id: Uuid, thresholds: StateThresholds) -> Self {
        let now = Utc::now();
        Self {
            machine_id,
            thresholds,
            reading_buffer: VecDeque::with_capacity(READING_BUFFER_CAP),
            temp_history: VecDeque::with_capacity(TEMP_HISTORY_CAP),
            current: MachineStateInfo {
                state: MachineState::Off,
                confidence: 0.5,
                state_since: now,
                last_updated: now,
                metrics: DerivedMetrics::default(),
                flags: BTreeMap::new(),
                state_duration_seconds: 0.0,
            },
            pending: None,
            production_last_met: None,
        }
    }

    /// Restore state from the latest persisted transition, so a restarted
    /// service does not re-announce the current regime.
    pub fn hydrate(&mut self, state: MachineState, state_since: DateTime<Utc>, confidence: f64) {
        self.current.state = state;
        self.current.state_since = state_since;
        self.current.confidence = confidence;
        self.current.last_updated = state_since;
        debug!(machine_id = %self.machine_id, state = %state, "Detector hydrated from history");
    }

    pub fn is_in_production(&self) -> bool {
        self.current.state.is_production()
    }

    /// Feed one reading and update the reported state.
    pub fn add_reading(&mut self, reading: SensorReading) -> StateUpdate {
        let now = reading.timestamp;

        self.reading_buffer.push_back(reading);
        while self.reading_buffer.len() > READING_BUFFER_CAP {
            self.reading_buffer.pop_front();
        }

        let metrics = self.derive_metrics(&reading);

        let mut sensor_fault = false;
        let (candidate, confidence) = match self.detect_sensor_fault(&reading) {
            Some(reason) => {
                warn!(machine_id = %self.machine_id, reason, "Sensor fault detected, defaulting to OFF");
                sensor_fault = true;
                (MachineState::Off, 0.3)
            }
            None => self.classify(&reading, &metrics),
        };

        if self.meets_production_criteria(&reading) {
            self.production_last_met = Some(now);
        }

        let (final_state, final_confidence) = self.apply_hysteresis(candidate, confidence, now);

        let mut transition = None;
        if final_state != self.current.state {
            let previous_duration = (now - self.current.state_since).num_seconds().max(0) as f64;
            transition = Some(StateTransition {
                machine_id: self.machine_id,
                from_state: self.current.state,
                to_state: final_state,
                transition_time: now,
                previous_state_duration_seconds: previous_duration,
                confidence_before: self.current.confidence,
                confidence_after: final_confidence,
                sensor_data: serde_json::json!({
                    "screw_rpm": reading.screw_rpm,
                    "pressure_bar": reading.pressure_bar,
                    "temp_avg": metrics.temp_avg,
                    "d_temp_avg": metrics.d_temp_avg,
                }),
                reason: transition_reason(self.current.state, final_state),
            });

            info!(
                machine_id = %self.machine_id,
                from = %self.current.state,
                to = %final_state,
                "Machine state changed"
            );
            self.current.state = final_state;
            self.current.confidence = final_confidence;
            self.current.state_since = now;
            self.pending = None;
        } else {
            self.current.confidence = final_confidence;
        }

        self.current.last_updated = now;
        self.current.metrics = metrics;
        self.current.state_duration_seconds =
            (now - self.current.state_since).num_seconds().max(0) as f64;
        self.current.flags.clear();
        if sensor_fault {
            self.current
                .flags
                .insert("sensor_fault".into(), serde_json::Value::Bool(true));
        }

        StateUpdate {
            info: self.current.clone(),
            transition,
        }
    }

    /// Current state with staleness handling: no readings at all reports
    /// OFF at 0.1 confidence, a silent feed for five minutes reports OFF
    /// at 0.2 with a `stale` flag.
    pub fn current_state(&self, now: DateTime<Utc>) -> MachineStateInfo {
        let last_reading = self.reading_buffer.back().map(|r| r.timestamp);

        if last_reading.is_none() {
            let mut flags = BTreeMap::new();
            flags.insert("no_data".into(), serde_json::Value::Bool(true));
            flags.insert(
                "last_known_state".into(),
                serde_json::Value::String(self.current.state.as_str().into()),
            );
            return MachineStateInfo {
                state: MachineState::Off,
                confidence: 0.1,
                state_since: self.current.state_since,
                last_updated: now,
                metrics: DerivedMetrics::default(),
                flags,
                state_duration_seconds: (now - self.current.state_since).num_seconds().max(0)
                    as f64,
            };
        }

        let silent_secs = last_reading.map_or(i64::MAX, |t| (now - t).num_seconds());
        if silent_secs > STATE_STALE_SECS {
            warn!(
                machine_id = %self.machine_id,
                silent_s = silent_secs,
                "Machine state is stale, reporting OFF"
            );
            let mut flags = BTreeMap::new();
            flags.insert("stale".into(), serde_json::Value::Bool(true));
            flags.insert(
                "last_known_state".into(),
                serde_json::Value::String(self.current.state.as_str().into()),
            );
            return MachineStateInfo {
                state: MachineState::Off,
                confidence: 0.2,
                state_since: self.current.state_since,
                last_updated: now,
                metrics: DerivedMetrics::default(),
                flags,
                state_duration_seconds: silent_secs as f64,
            };
        }

        self.current.clone()
    }

    // ------------------------------------------------------------------
    // Derived metrics
    // ------------------------------------------------------------------

    fn derive_metrics(&mut self, reading: &SensorReading) -> DerivedMetrics {
        let temps = reading.valid_temps();
        let temp_avg = reading.temp_avg();
        let temp_spread = if temps.len() >= 2 {
            let max = temps.iter().fold(f64::MIN, |a, &b| a.max(b));
            let min = temps.iter().fold(f64::MAX, |a, &b| a.min(b));
            Some(max - min)
        } else {
            None
        };

        if let Some(avg) = temp_avg {
            self.temp_history.push_back((reading.timestamp, avg));
            while self.temp_history.len() > TEMP_HISTORY_CAP {
                self.temp_history.pop_front();
            }
        }

        let d_temp_avg = temp_avg.and_then(|avg| self.temp_slope(reading.timestamp, avg));
        let rpm_stable = self.stability(reading.timestamp, |r| r.screw_rpm);
        let pressure_stable = self.stability(reading.timestamp, |r| r.pressure_bar);

        let any_temp_above_min = temps.iter().any(|&t| t > self.thresholds.t_min_active);
        let all_temps_below = temps.is_empty() || temps.iter().all(|&t| t < self.thresholds.t_min_active);

        DerivedMetrics {
            temp_avg,
            temp_spread,
            d_temp_avg,
            rpm_stable,
            pressure_stable,
            any_temp_above_min,
            all_temps_below,
        }
    }

    /// Slope °C/min: current average versus the mean of history samples
    /// 5-6 minutes old.
    fn temp_slope(&self, now: DateTime<Utc>, current: f64) -> Option<f64> {
        let lo = now - Duration::minutes(6);
        let hi = now - Duration::minutes(5);
        let historical: Vec<f64> = self
            .temp_history
            .iter()
            .filter(|(ts, _)| *ts >= lo && *ts <= hi)
            .map(|(_, v)| *v)
            .collect();
        if historical.is_empty() {
            return None;
        }
        Some((current - historical.iter().mean()) / 5.0)
    }

    /// Std dev of a channel over the last 10 minutes; needs 10 samples.
    fn stability(
        &self,
        now: DateTime<Utc>,
        field: impl Fn(&SensorReading) -> Option<f64>,
    ) -> Option<f64> {
        if self.reading_buffer.len() < 10 {
            return None;
        }
        let cutoff = now - Duration::minutes(10);
        let values: Vec<f64> = self
            .reading_buffer
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .filter_map(|r| field(r))
            .collect();
        if values.len() < 10 {
            return None;
        }
        Some(values.iter().std_dev())
    }

    // ------------------------------------------------------------------
    // Fault detection and classification
    // ------------------------------------------------------------------

    fn detect_sensor_fault(&self, reading: &SensorReading) -> Option<&'static str> {
        let temps = reading.valid_temps();

        if temps.iter().any(|&t| t <= 0.0) {
            return Some("implausible temperature (<= 0 °C)");
        }
        if temps.iter().any(|&t| t > 400.0) {
            return Some("implausible temperature (> 400 °C)");
        }

        if let (Some(pressure), Some(rpm)) = (reading.pressure_bar, reading.screw_rpm) {
            if pressure == 0.0 && rpm > self.thresholds.rpm_prod {
                return Some("pressure reads 0 while screw is turning");
            }
        }

        if reading.screw_rpm.is_none() {
            return Some("screw rpm missing");
        }

        if temps.len() < 2 {
            return Some("fewer than two valid temperature zones");
        }

        // Up to 24 h ahead is tolerated (timezone offsets); beyond that the
        // clock source itself is suspect.
        if reading.timestamp > Utc::now() + Duration::hours(24) {
            return Some("timestamp more than 24 h in the future");
        }

        None
    }

    fn meets_production_criteria(&self, reading: &SensorReading) -> bool {
        let Some(rpm) = reading.screw_rpm else {
            return false;
        };
        if rpm < self.thresholds.rpm_prod {
            return false;
        }
        reading
            .pressure_bar
            .is_some_and(|p| p >= self.thresholds.p_prod)
    }

    fn classify(&self, reading: &SensorReading, metrics: &DerivedMetrics) -> (MachineState, f64) {
        let t = &self.thresholds;
        let Some(rpm) = reading.screw_rpm else {
            return (MachineState::Off, 0.3);
        };
        let pressure = reading.pressure_bar;
        let pressure_val = pressure.unwrap_or(0.0);
        let temp_avg = metrics.temp_avg;
        let d_temp = metrics.d_temp_avg;

        // PRODUCTION primary: rotation and pressure both at production levels.
        if rpm >= t.rpm_prod && pressure.is_some_and(|p| p >= t.p_prod) {
            return (MachineState::Production, 0.9);
        }

        // PRODUCTION fallback: rotation plus any secondary evidence.
        if rpm >= t.rpm_prod {
            let mut conditions = 0;
            if pressure.is_some_and(|p| p >= t.p_on) {
                conditions += 1;
            }
            if reading.motor_load.is_some_and(|m| m >= t.motor_load_min) {
                conditions += 1;
            }
            if reading
                .throughput_kg_h
                .is_some_and(|x| x >= t.throughput_min)
            {
                conditions += 1;
            }
            if conditions > 0 {
                let confidence = if conditions > 1 { 0.7 } else { 0.6 };
                return (MachineState::Production, confidence);
            }
        }

        // OFF only when the machine is actually cold; a warm machine that
        // is not turning falls through to COOLING/HEATING/IDLE.
        if rpm < t.rpm_on {
            match temp_avg {
                Some(avg) if avg < t.t_min_active => return (MachineState::Off, 0.9),
                None if pressure_val < t.p_on => return (MachineState::Off, 0.7),
                _ => {}
            }
        }

        if rpm < t.rpm_on {
            if let (Some(avg), Some(d)) = (temp_avg, d_temp) {
                if avg >= t.t_min_active && d <= t.cooling_rate {
                    return (MachineState::Cooling, 0.8);
                }
            }
        }

        if rpm < t.rpm_prod {
            if let (Some(avg), Some(d)) = (temp_avg, d_temp) {
                if avg >= t.t_min_active && d >= t.heating_rate {
                    return (MachineState::Heating, 0.8);
                }
            }
        }

        // IDLE: warm, not turning, residual pressure tolerated up to 1.5x P_ON.
        if rpm < t.rpm_on {
            if let Some(avg) = temp_avg {
                if avg >= t.t_min_active && pressure_val < t.p_on * 1.5 {
                    return match d_temp {
                        Some(d) if d.abs() < t.temp_flat_rate => (MachineState::Idle, 0.8),
                        None => (MachineState::Idle, 0.6),
                        Some(_) => (MachineState::Idle, 0.5),
                    };
                }
            }
        }

        (MachineState::Off, 0.4)
    }

    // ------------------------------------------------------------------
    // Hysteresis
    // ------------------------------------------------------------------

    fn apply_hysteresis(
        &mut self,
        candidate: MachineState,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> (MachineState, f64) {
        let current = self.current.state;

        if candidate == current {
            self.pending = None;
            return (current, confidence);
        }

        if candidate == MachineState::Production {
            let since = match self.pending {
                Some((MachineState::Production, since)) => since,
                _ => {
                    self.pending = Some((MachineState::Production, now));
                    now
                }
            };

            let timer_expired =
                (now - since).num_seconds() >= self.thresholds.production_enter_time;
            let enough_readings = self.reading_buffer.len() >= 10;
            let tail_meeting = self
                .reading_buffer
                .iter()
                .rev()
                .take(30)
                .filter(|r| self.meets_production_criteria(r))
                .count();

            if (timer_expired && enough_readings) || tail_meeting >= 10 {
                debug!(
                    machine_id = %self.machine_id,
                    timer_expired,
                    tail_meeting,
                    "PRODUCTION transition allowed"
                );
                return (MachineState::Production, confidence);
            }
            debug!(
                machine_id = %self.machine_id,
                tail_meeting,
                "PRODUCTION transition waiting for dwell"
            );
            return (current, self.current.confidence);
        }

        if current == MachineState::Production {
            // Exit only once the criteria have been unmet long enough.
            let unmet_secs = self
                .production_last_met
                .map_or(i64::MAX, |t| (now - t).num_seconds());
            if unmet_secs >= self.thresholds.production_exit_time {
                return (candidate, confidence);
            }
            return (current, self.current.confidence);
        }

        // Generic debounce for the remaining transitions.
        match self.pending {
            Some((pending_state, since)) if pending_state == candidate => {
                if (now - since).num_seconds() >= self.thresholds.state_change_debounce {
                    (candidate, confidence)
                } else {
                    (current, self.current.confidence)
                }
            }
            _ => {
                self.pending = Some((candidate, now));
                (current, self.current.confidence)
            }
        }
    }
}

/// Human-readable reason for a transition.
fn transition_reason(from: MachineState, to: MachineState) -> String {
    use MachineState::{Cooling, Heating, Idle, Off, Production};
    match (from, to) {
        (Off, Heating) => "Temperature started rising".into(),
        (Heating, Production) => "Production criteria met".into(),
        (Idle, Production) => "Production started".into(),
        (Production, Idle) => "Production stopped".into(),
        (Production, Cooling) => "Production stopped, cooling down".into(),
        (Cooling, Off) => "Machine cooled down".into(),
        (Heating, Idle) => "Temperature stabilized".into(),
        (Idle, Cooling) => "Temperature started falling".into(),
        (_, to) => format!("State changed to {to}"),
    }
}

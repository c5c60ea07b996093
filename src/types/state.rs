//! Machine operating states and state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operating regime of an extrusion machine.
///
/// Process evaluation (traffic light, baselines, anomalies) only runs in
/// `Production`; the other states gate the pipeline off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    /// Machine off / cold.
    #[default]
    Off,
    /// Warming up, not producing.
    Heating,
    /// Warm and ready, not producing.
    Idle,
    /// Active process.
    Production,
    /// Cooling down, not producing.
    Cooling,
}

impl MachineState {
    /// Uppercase wire label (matches the persisted enum).
    pub fn as_str(self) -> &'static str {
        match self {
            MachineState::Off => "OFF",
            MachineState::Heating => "HEATING",
            MachineState::Idle => "IDLE",
            MachineState::Production => "PRODUCTION",
            MachineState::Cooling => "COOLING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" => Some(MachineState::Off),
            "HEATING" => Some(MachineState::Heating),
            "IDLE" => Some(MachineState::Idle),
            "PRODUCTION" => Some(MachineState::Production),
            "COOLING" => Some(MachineState::Cooling),
            _ => None,
        }
    }

    pub fn is_production(self) -> bool {
        self == MachineState::Production
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metrics derived from a sensor reading plus detector history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Mean of available temperature zones (°C).
    pub temp_avg: Option<f64>,
    /// Max minus min across temperature zones (°C).
    pub temp_spread: Option<f64>,
    /// Temperature slope (°C/min) against the 5-6 minute back-window.
    pub d_temp_avg: Option<f64>,
    /// RPM std dev over the 10-minute buffer.
    pub rpm_stable: Option<f64>,
    /// Pressure std dev over the 10-minute buffer.
    pub pressure_stable: Option<f64>,
    /// Any zone above the active-temperature threshold.
    pub any_temp_above_min: bool,
    /// All zones below the active-temperature threshold.
    pub all_temps_below: bool,
}

/// Current machine state with metadata, as returned by the detector and
/// persisted on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineStateInfo {
    pub state: MachineState,
    /// Classification confidence in [0, 1].
    pub confidence: f64,
    /// When the current state was entered.
    pub state_since: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub metrics: DerivedMetrics,
    /// Condition flags: `stale`, `no_data`, `sensor_fault`, `last_known_state`.
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
    pub state_duration_seconds: f64,
}

impl MachineStateInfo {
    pub fn flag(&self, key: &str) -> bool {
        self.flags.get(key).and_then(serde_json::Value::as_bool) == Some(true)
    }
}

/// A persisted state transition (append-only history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub machine_id: uuid::Uuid,
    pub from_state: MachineState,
    pub to_state: MachineState,
    pub transition_time: DateTime<Utc>,
    pub previous_state_duration_seconds: f64,
    pub confidence_before: f64,
    pub confidence_after: f64,
    /// Sensor snapshot at the moment of transition.
    pub sensor_data: serde_json::Value,
    pub reason: String,
}

/// Operator-facing state event (e.g. production started/ended).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateAlert {
    pub machine_id: uuid::Uuid,
    pub alert_type: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub state: MachineState,
    pub previous_state: Option<MachineState>,
    pub alert_time: DateTime<Utc>,
}

/// Aggregated time-in-state statistics over a period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateStatistics {
    pub machine_id: uuid::Uuid,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds spent per state.
    pub state_seconds: BTreeMap<String, f64>,
    /// Percentage of the period per state.
    pub state_percentages: BTreeMap<String, f64>,
    pub total_transitions: usize,
    pub production_cycles: usize,
    pub avg_production_duration_seconds: f64,
    pub total_production_seconds: f64,
}

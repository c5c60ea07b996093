//! State-detection thresholds, per-machine configurable.

use serde::{Deserialize, Serialize};

/// Thresholds driving the five-state classifier and its hysteresis.
///
/// Defaults match the commissioning values for a mid-size single-screw
/// extruder; operators override them per machine via the profile store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateThresholds {
    /// rpm - movement present.
    pub rpm_on: f64,
    /// rpm - production-capable rotation (inclusive).
    pub rpm_prod: f64,
    /// bar - pressure present.
    pub p_on: f64,
    /// bar - production-typical pressure.
    pub p_prod: f64,
    /// °C - below this the machine counts as cold.
    pub t_min_active: f64,

    /// °C/min - positive slope threshold for HEATING.
    pub heating_rate: f64,
    /// °C/min - negative slope threshold for COOLING.
    pub cooling_rate: f64,
    /// °C/min - |slope| below this is considered flat.
    pub temp_flat_rate: f64,

    /// rpm std dev considered stable.
    pub rpm_stable_max: f64,
    /// bar std dev considered stable.
    pub pressure_stable_max: f64,

    /// Dwell before entering PRODUCTION (seconds).
    pub production_enter_time: i64,
    /// Dwell before exiting PRODUCTION (seconds).
    pub production_exit_time: i64,
    /// Generic debounce for other transitions (seconds).
    pub state_change_debounce: i64,

    /// Motor-load fraction for the production fallback rule.
    pub motor_load_min: f64,
    /// kg/h throughput for the production fallback rule.
    pub throughput_min: f64,
}

impl Default for StateThresholds {
    fn default() -> Self {
        Self {
            rpm_on: 5.0,
            rpm_prod: 10.0,
            p_on: 2.0,
            p_prod: 5.0,
            t_min_active: 60.0,
            heating_rate: 0.2,
            cooling_rate: -0.2,
            temp_flat_rate: 0.2,
            rpm_stable_max: 2.0,
            pressure_stable_max: 1.0,
            production_enter_time: 90,
            production_exit_time: 120,
            state_change_debounce: 60,
            motor_load_min: 0.15,
            throughput_min: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_commissioning_values() {
        let t = StateThresholds::default();
        assert_eq!(t.rpm_prod, 10.0);
        assert_eq!(t.p_prod, 5.0);
        assert_eq!(t.production_enter_time, 90);
        assert_eq!(t.production_exit_time, 120);
        assert!(t.cooling_rate < 0.0);
    }
}

//! Machine-state detection.
//!
//! Classifies each machine into {OFF, HEATING, IDLE, PRODUCTION, COOLING}
//! per tick with hysteresis, and gates all downstream evaluation: baselines
//! are learned and readings scored only while a machine is in PRODUCTION.

mod detector;
mod registry;

pub use detector::{MachineStateDetector, StateUpdate};
pub use registry::DetectorRegistry;

use crate::types::{MachineState, StateAlert, StateTransition};

/// Operator-facing alert for the transitions worth announcing
/// (production start and end).
pub fn state_alert_for_transition(transition: &StateTransition) -> Option<StateAlert> {
    if transition.to_state == MachineState::Production {
        return Some(StateAlert {
            machine_id: transition.machine_id,
            alert_type: "PRODUCTION_START".into(),
            severity: "info".into(),
            title: "Production Started".into(),
            message: format!(
                "Machine {} has entered production state.",
                transition.machine_id
            ),
            state: transition.to_state,
            previous_state: Some(transition.from_state),
            alert_time: transition.transition_time,
        });
    }
    if transition.from_state == MachineState::Production {
        return Some(StateAlert {
            machine_id: transition.machine_id,
            alert_type: "PRODUCTION_END".into(),
            severity: "info".into(),
            title: "Production Ended".into(),
            message: format!(
                "Machine {} has exited production state.",
                transition.machine_id
            ),
            state: transition.to_state,
            previous_state: Some(transition.from_state),
            alert_time: transition.transition_time,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn transition(from: MachineState, to: MachineState) -> StateTransition {
        StateTransition {
            machine_id: Uuid::new_v4(),
            from_state: from,
            to_state: to,
            transition_time: Utc::now(),
            previous_state_duration_seconds: 10.0,
            confidence_before: 0.8,
            confidence_after: 0.9,
            sensor_data: serde_json::json!({}),
            reason: String::new(),
        }
    }

    #[test]
    fn alerts_only_for_production_boundaries() {
        let start = transition(MachineState::Idle, MachineState::Production);
        assert_eq!(
            state_alert_for_transition(&start).map(|a| a.alert_type),
            Some("PRODUCTION_START".to_string())
        );

        let end = transition(MachineState::Production, MachineState::Cooling);
        assert_eq!(
            state_alert_for_transition(&end).map(|a| a.alert_type),
            Some("PRODUCTION_END".to_string())
        );

        let other = transition(MachineState::Off, MachineState::Heating);
        assert!(state_alert_for_transition(&other).is_none());
    }
}

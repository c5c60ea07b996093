//! Profile lifecycle rules and baseline statistics.
//!
//! The relational side of profiles (lookup, sample rows, stats rows, bands,
//! templates) lives in `storage`; this module carries the pure rules the
//! store enforces: which samples may be collected, when a baseline may be
//! finalized, and how the statistics are computed.

pub mod stats;

use thiserror::Error;

use crate::config::defaults::MIN_SAMPLES_FOR_BASELINE;
use crate::types::{metrics, MachineState, Profile};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("profile {0} is already in baseline learning mode")]
    AlreadyLearning(uuid::Uuid),

    #[error("profile {0} is not in baseline learning mode")]
    NotLearning(uuid::Uuid),

    #[error("profile {0} has no samples to finalize")]
    NoSamples(uuid::Uuid),

    #[error("metric {metric}: {have} samples collected, {need} required")]
    InsufficientSamples {
        metric: String,
        have: i64,
        need: i64,
    },

    #[error("an active profile already exists for this machine and material")]
    DuplicateActiveProfile,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Why a sample was not collected this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectRefusal {
    NotLearning,
    NotInProduction,
    UnknownMetric,
}

/// Gate for baseline sample collection: learning flag set, machine in
/// PRODUCTION, metric in the tracked set.
pub fn collect_gate(
    profile: &Profile,
    machine_state: MachineState,
    metric: &str,
) -> Result<(), CollectRefusal> {
    if !profile.baseline_learning {
        return Err(CollectRefusal::NotLearning);
    }
    if !machine_state.is_production() {
        return Err(CollectRefusal::NotInProduction);
    }
    if !metrics::BASELINE_METRICS.contains(&metric) {
        return Err(CollectRefusal::UnknownMetric);
    }
    Ok(())
}

/// Check per-metric sample counts against the finalize minimum.
pub fn finalize_gate(counts: &[(String, i64)]) -> Result<(), ProfileError> {
    for (metric, count) in counts {
        if *count < MIN_SAMPLES_FOR_BASELINE {
            return Err(ProfileError::InsufficientSamples {
                metric: metric.clone(),
                have: *count,
                need: MIN_SAMPLES_FOR_BASELINE,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn profile(learning: bool) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            machine_id: Some(Uuid::new_v4()),
            material_id: "Material 1".into(),
            is_active: true,
            baseline_learning: learning,
            baseline_ready: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn gate_requires_learning_flag() {
        let p = profile(false);
        assert_eq!(
            collect_gate(&p, MachineState::Production, metrics::PRESSURE),
            Err(CollectRefusal::NotLearning)
        );
    }

    #[test]
    fn gate_requires_production() {
        let p = profile(true);
        for state in [
            MachineState::Off,
            MachineState::Heating,
            MachineState::Idle,
            MachineState::Cooling,
        ] {
            assert_eq!(
                collect_gate(&p, state, metrics::PRESSURE),
                Err(CollectRefusal::NotInProduction)
            );
        }
        assert!(collect_gate(&p, MachineState::Production, metrics::PRESSURE).is_ok());
    }

    #[test]
    fn gate_rejects_unknown_metrics() {
        let p = profile(true);
        assert_eq!(
            collect_gate(&p, MachineState::Production, "Torque_Nm"),
            Err(CollectRefusal::UnknownMetric)
        );
    }

    #[test]
    fn finalize_gate_needs_min_samples_per_metric() {
        let ok: Vec<(String, i64)> = metrics::BASELINE_METRICS
            .iter()
            .map(|m| ((*m).to_string(), 150))
            .collect();
        assert!(finalize_gate(&ok).is_ok());

        let short = vec![("Pressure_bar".to_string(), 99)];
        assert!(matches!(
            finalize_gate(&short),
            Err(ProfileError::InsufficientSamples { need: 100, .. })
        ));
    }
}

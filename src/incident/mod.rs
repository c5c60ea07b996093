//! Incident management - wear profiles and calm alarm control.
//!
//! The classifier turns short-term trends into a wear profile per machine;
//! the policy turns the profile stream into a calm sequence of alarm and
//! ticket actions with dwell, cooldown, dedup, and recovery. Incident
//! decisions are best-effort: a failure here never blocks prediction
//! persistence.

mod classifier;
mod policy;

pub use classifier::{OperatingRanges, WearClassifier, WearDecision, CANONICAL_VARS};
pub use policy::{IncidentAction, IncidentManager, IncidentPolicy};

use crate::types::Severity;

/// Wear profile of a machine: the incident policy's input alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum WearProfile {
    /// Profile 0 - baseline / normal operation.
    Baseline,
    /// Profile 1 - early wear.
    EarlyWear,
    /// Profile 2 - advanced wear.
    AdvancedWear,
    /// Profile 3 - fault.
    Fault,
}

impl WearProfile {
    pub fn code(self) -> u8 {
        match self {
            WearProfile::Baseline => 0,
            WearProfile::EarlyWear => 1,
            WearProfile::AdvancedWear => 2,
            WearProfile::Fault => 3,
        }
    }

    /// Profile implied by the evaluator's overall process severity. The
    /// trend classifier may escalate beyond it (never below).
    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Orange => WearProfile::EarlyWear,
            Severity::Red => WearProfile::AdvancedWear,
            Severity::Green | Severity::Unknown => WearProfile::Baseline,
        }
    }
}

impl std::fmt::Display for WearProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "profile {}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_onto_profiles() {
        assert_eq!(WearProfile::from_severity(Severity::Green), WearProfile::Baseline);
        assert_eq!(WearProfile::from_severity(Severity::Unknown), WearProfile::Baseline);
        assert_eq!(WearProfile::from_severity(Severity::Orange), WearProfile::EarlyWear);
        assert_eq!(WearProfile::from_severity(Severity::Red), WearProfile::AdvancedWear);
    }

    #[test]
    fn profile_ordering_supports_escalation_max() {
        assert!(WearProfile::Fault > WearProfile::AdvancedWear);
        assert!(WearProfile::AdvancedWear > WearProfile::EarlyWear);
        assert!(WearProfile::EarlyWear > WearProfile::Baseline);
        assert_eq!(
            WearProfile::AdvancedWear.max(WearProfile::EarlyWear),
            WearProfile::AdvancedWear
        );
    }
}

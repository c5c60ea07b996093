//! Calm-control incident policy.
//!
//! Transforms the continuous wear-profile stream into at most one alarm and
//! one ticket per incident. Planning is pure - the manager returns
//! [`IncidentAction`]s and the storage layer applies them transactionally,
//! re-checking dedup against the database before any insert.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{incident_keys, AlarmSeverity};

use super::WearProfile;

/// Dwell and cooldown thresholds; operators tune these per deployment.
#[derive(Debug, Clone, Copy)]
pub struct IncidentPolicy {
    pub early_wear_persist_seconds: i64,
    pub advanced_wear_persist_seconds: i64,
    pub fault_ticket_min_seconds: i64,
    pub recovery_stable_seconds: i64,
    pub alarm_cooldown_minutes: i64,
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self {
            early_wear_persist_seconds: 300,
            advanced_wear_persist_seconds: 60,
            fault_ticket_min_seconds: 180,
            recovery_stable_seconds: 60,
            alarm_cooldown_minutes: 15,
        }
    }
}

/// Per-machine runtime tracking.
#[derive(Debug, Clone, Copy)]
struct MachineIncidentState {
    profile: WearProfile,
    profile_since: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// What the policy wants done this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncidentAction {
    EnsureAlarm {
        incident_key: String,
        severity: AlarmSeverity,
        message: String,
        triggered_at: DateTime<Utc>,
        create_ticket: bool,
        /// Never re-emit this incident key, even after resolution.
        dedup_forever: bool,
    },
    ResolveIncidents {
        note: String,
    },
}

/// Runtime incident controller.
///
/// The goal is calmness: no flapping alarms, no ticket floods. One incident
/// produces at most one alarm and one ticket. Persistence across restarts
/// comes from the deterministic incident keys stored in alarm metadata -
/// the applier always re-checks the database before creating anything.
pub struct IncidentManager {
    policy: IncidentPolicy,
    states: HashMap<Uuid, MachineIncidentState>,
    last_alarm_at: HashMap<String, DateTime<Utc>>,
}

impl Default for IncidentManager {
    fn default() -> Self {
        Self::new(IncidentPolicy::default())
    }
}

impl IncidentManager {
    pub fn new(policy: IncidentPolicy) -> Self {
        Self {
            policy,
            states: HashMap::new(),
            last_alarm_at: HashMap::new(),
        }
    }

    /// Drop all runtime tracking (reset-state command).
    pub fn reset_runtime_state(&mut self) {
        self.states.clear();
        self.last_alarm_at.clear();
    }

    /// Record that an alarm for this key was actually created, for the
    /// cooldown bookkeeping.
    pub fn note_alarm_created(&mut self, incident_key: &str, at: DateTime<Utc>) {
        self.last_alarm_at.insert(incident_key.to_string(), at);
    }

    /// Feed one wear-profile observation and plan the resulting actions.
    pub fn observe_profile(
        &mut self,
        machine_id: Uuid,
        profile: WearProfile,
        observed_at: DateTime<Utc>,
    ) -> Vec<IncidentAction> {
        let state = self
            .states
            .entry(machine_id)
            .and_modify(|s| {
                s.last_seen = observed_at;
                if s.profile != profile {
                    s.profile = profile;
                    s.profile_since = observed_at;
                }
            })
            .or_insert(MachineIncidentState {
                profile,
                profile_since: observed_at,
                last_seen: observed_at,
            });
        let state = *state;

        self.plan(machine_id, state, observed_at)
    }

    fn plan(
        &mut self,
        machine_id: Uuid,
        state: MachineIncidentState,
        now: DateTime<Utc>,
    ) -> Vec<IncidentAction> {
        let elapsed = (now - state.profile_since).num_seconds();

        match state.profile {
            WearProfile::Baseline => {
                if elapsed >= self.policy.recovery_stable_seconds {
                    vec![IncidentAction::ResolveIncidents {
                        note: "Recovered to profile 0 (stable)".into(),
                    }]
                } else {
                    Vec::new()
                }
            }
            WearProfile::EarlyWear => {
                if elapsed < self.policy.early_wear_persist_seconds {
                    return Vec::new();
                }
                self.ensure_alarm(
                    incident_keys::early_wear(machine_id),
                    AlarmSeverity::Warning,
                    "Early wear detected (persistent trend)",
                    state.profile_since,
                    false,
                    false,
                    now,
                )
            }
            WearProfile::AdvancedWear => {
                if elapsed < self.policy.advanced_wear_persist_seconds {
                    return Vec::new();
                }
                self.ensure_alarm(
                    incident_keys::advanced_wear(machine_id),
                    AlarmSeverity::Critical,
                    "Advanced wear detected (controlled escalation)",
                    state.profile_since,
                    true,
                    true,
                    now,
                )
            }
            WearProfile::Fault => {
                let create_ticket = elapsed >= self.policy.fault_ticket_min_seconds;
                self.ensure_alarm(
                    incident_keys::fault_event(machine_id),
                    AlarmSeverity::Critical,
                    "Fault event detected",
                    state.profile_since,
                    create_ticket,
                    false,
                    now,
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn ensure_alarm(
        &mut self,
        incident_key: String,
        severity: AlarmSeverity,
        message: &str,
        triggered_at: DateTime<Utc>,
        create_ticket: bool,
        dedup_forever: bool,
        now: DateTime<Utc>,
    ) -> Vec<IncidentAction> {
        // Cooldown: at least 15 minutes between alarms of the same key.
        if let Some(last) = self.last_alarm_at.get(&incident_key) {
            if now - *last < Duration::minutes(self.policy.alarm_cooldown_minutes) {
                return Vec::new();
            }
        }
        vec![IncidentAction::EnsureAlarm {
            incident_key,
            severity,
            message: message.to_string(),
            triggered_at,
            create_ticket,
            dedup_forever,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        base() + Duration::seconds(secs)
    }

    #[test]
    fn profile_zero_resolves_after_recovery_window() {
        let mut m = IncidentManager::default();
        let id = Uuid::new_v4();
        assert!(m.observe_profile(id, WearProfile::Baseline, at(0)).is_empty());
        assert!(m.observe_profile(id, WearProfile::Baseline, at(30)).is_empty());
        let actions = m.observe_profile(id, WearProfile::Baseline, at(61));
        assert_eq!(
            actions,
            vec![IncidentAction::ResolveIncidents {
                note: "Recovered to profile 0 (stable)".into()
            }]
        );
    }

    #[test]
    fn early_wear_needs_five_minutes() {
        let mut m = IncidentManager::default();
        let id = Uuid::new_v4();
        assert!(m.observe_profile(id, WearProfile::EarlyWear, at(0)).is_empty());
        assert!(m.observe_profile(id, WearProfile::EarlyWear, at(299)).is_empty());
        let actions = m.observe_profile(id, WearProfile::EarlyWear, at(300));
        match &actions[..] {
            [IncidentAction::EnsureAlarm {
                incident_key,
                severity,
                create_ticket,
                dedup_forever,
                ..
            }] => {
                assert_eq!(*incident_key, format!("{id}:profile1:early_wear"));
                assert_eq!(*severity, AlarmSeverity::Warning);
                assert!(!create_ticket);
                assert!(!dedup_forever);
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn advanced_wear_alarms_once_with_ticket() {
        let mut m = IncidentManager::default();
        let id = Uuid::new_v4();
        assert!(m
            .observe_profile(id, WearProfile::AdvancedWear, at(0))
            .is_empty());
        let actions = m.observe_profile(id, WearProfile::AdvancedWear, at(90));
        match &actions[..] {
            [IncidentAction::EnsureAlarm {
                incident_key,
                severity,
                create_ticket,
                dedup_forever,
                ..
            }] => {
                assert_eq!(*incident_key, format!("{id}:profile2:advanced_wear"));
                assert_eq!(*severity, AlarmSeverity::Critical);
                assert!(create_ticket);
                assert!(dedup_forever);
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn fault_tickets_only_after_dwell() {
        let mut m = IncidentManager::default();
        let id = Uuid::new_v4();
        let actions = m.observe_profile(id, WearProfile::Fault, at(0));
        match &actions[..] {
            [IncidentAction::EnsureAlarm { create_ticket, .. }] => assert!(!create_ticket),
            other => panic!("unexpected actions: {other:?}"),
        }

        // Cooldown suppresses the repeat plan; after it elapses the fault
        // has persisted long enough for a ticket.
        m.note_alarm_created(&format!("{id}:profile3:fault_event"), at(0));
        assert!(m.observe_profile(id, WearProfile::Fault, at(200)).is_empty());
        let actions = m.observe_profile(id, WearProfile::Fault, at(1000));
        match &actions[..] {
            [IncidentAction::EnsureAlarm { create_ticket, .. }] => assert!(create_ticket),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn cooldown_suppresses_reemission() {
        let mut m = IncidentManager::default();
        let id = Uuid::new_v4();
        m.observe_profile(id, WearProfile::AdvancedWear, at(0));
        let actions = m.observe_profile(id, WearProfile::AdvancedWear, at(70));
        assert_eq!(actions.len(), 1);
        m.note_alarm_created(&format!("{id}:profile2:advanced_wear"), at(70));

        // Within the 15-minute cooldown: nothing.
        assert!(m
            .observe_profile(id, WearProfile::AdvancedWear, at(500))
            .is_empty());
        // After the cooldown the plan re-emits; the database dedup decides
        // whether anything is actually created.
        assert_eq!(
            m.observe_profile(id, WearProfile::AdvancedWear, at(70 + 16 * 60))
                .len(),
            1
        );
    }

    #[test]
    fn profile_change_restarts_dwell() {
        let mut m = IncidentManager::default();
        let id = Uuid::new_v4();
        m.observe_profile(id, WearProfile::AdvancedWear, at(0));
        // Dip back to baseline, then advanced again: dwell restarts.
        m.observe_profile(id, WearProfile::Baseline, at(30));
        assert!(m
            .observe_profile(id, WearProfile::AdvancedWear, at(40))
            .is_empty());
        assert!(m
            .observe_profile(id, WearProfile::AdvancedWear, at(80))
            .is_empty());
        assert_eq!(
            m.observe_profile(id, WearProfile::AdvancedWear, at(101)).len(),
            1
        );
    }

    #[test]
    fn reset_clears_runtime_state() {
        let mut m = IncidentManager::default();
        let id = Uuid::new_v4();
        m.observe_profile(id, WearProfile::Fault, at(0));
        m.note_alarm_created(&format!("{id}:profile3:fault_event"), at(0));
        m.reset_runtime_state();
        // After reset the same fault plans an alarm again immediately.
        assert_eq!(m.observe_profile(id, WearProfile::Fault, at(10)).len(), 1);
    }
}

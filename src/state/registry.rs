//! Service-owned registry of per-machine detectors.
//!
//! Detector access is serialized per machine through the polling task;
//! cross-machine access may be parallel, hence the concurrent map of
//! per-machine mutexes. The registry is owned by the service and passed
//! where needed - never reached through module globals.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::{MachineState, MachineStateInfo, StateThresholds};

use super::detector::MachineStateDetector;

#[derive(Default)]
pub struct DetectorRegistry {
    detectors: DashMap<Uuid, Arc<Mutex<MachineStateDetector>>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the detector for a machine.
    pub fn get_or_create(
        &self,
        machine_id: Uuid,
        thresholds: StateThresholds,
    ) -> Arc<Mutex<MachineStateDetector>> {
        self.detectors
            .entry(machine_id)
            .or_insert_with(|| Arc::new(Mutex::new(MachineStateDetector::new(machine_id, thresholds))))
            .clone()
    }

    /// Drop a machine's detector (threshold change, machine deletion).
    pub fn remove(&self, machine_id: Uuid) {
        self.detectors.remove(&machine_id);
    }

    pub fn contains(&self, machine_id: Uuid) -> bool {
        self.detectors.contains_key(&machine_id)
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Snapshot the current state of every registered machine.
    pub async fn all_states(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<(Uuid, MachineStateInfo)> {
        let mut out = Vec::with_capacity(self.detectors.len());
        let handles: Vec<(Uuid, Arc<Mutex<MachineStateDetector>>)> = self
            .detectors
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (machine_id, detector) in handles {
            let info = detector.lock().await.current_state(now);
            out.push((machine_id, info));
        }
        out
    }

    /// Current state of one machine, if a detector exists for it.
    pub async fn current_state(
        &self,
        machine_id: Uuid,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<MachineStateInfo> {
        let detector = self.detectors.get(&machine_id).map(|e| e.value().clone())?;
        let guard = detector.lock().await;
        Some(guard.current_state(now))
    }

    /// Whether the machine is currently in PRODUCTION.
    pub async fn is_in_production(&self, machine_id: Uuid) -> bool {
        match self.detectors.get(&machine_id) {
            Some(entry) => {
                let detector = entry.value().clone();
                drop(entry);
                let guard = detector.lock().await;
                guard.current_state(chrono::Utc::now()).state == MachineState::Production
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_creates_once_per_machine() {
        let registry = DetectorRegistry::new();
        let id = Uuid::new_v4();
        let a = registry.get_or_create(id, StateThresholds::default());
        let b = registry.get_or_create(id, StateThresholds::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        registry.remove(id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_machine_is_not_in_production() {
        let registry = DetectorRegistry::new();
        assert!(!registry.is_in_production(Uuid::new_v4()).await);
    }
}

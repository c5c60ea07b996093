//! Machine and sensor records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A monitored machine.
///
/// Owned by the platform CRUD collaborators; the core reads it and stamps
/// metadata fields it relies on (`machine_type`, `current_material`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub criticality: String,
    /// Free-form metadata; carries `current_material` and the incident
    /// manager's persisted wear state.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Machine {
    /// Material currently loaded on the machine, falling back to the
    /// platform default when unset.
    pub fn current_material(&self) -> String {
        self.metadata
            .get("current_material")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(crate::config::defaults::DEFAULT_MATERIAL_ID)
            .to_string()
    }
}

/// A named signal belonging to one machine.
///
/// A single sensor-of-record per machine aggregates the historian snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub name: String,
    pub sensor_type: String,
    pub unit: Option<String>,
    pub warning_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_material_falls_back_to_default() {
        let machine = Machine {
            id: Uuid::new_v4(),
            name: "Extruder-SQL".into(),
            status: "online".into(),
            criticality: "high".into(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        };
        assert_eq!(machine.current_material(), "Material 1");

        let machine = Machine {
            metadata: serde_json::json!({"current_material": "PP-H 2150"}),
            ..machine
        };
        assert_eq!(machine.current_material(), "PP-H 2150");
    }
}

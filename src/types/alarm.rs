//! Alarms, tickets, and incident keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmSeverity {
    Warning,
    Critical,
}

impl AlarmSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlarmSeverity::Warning => "warning",
            AlarmSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlarmStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlarmStatus::Open => "open",
            AlarmStatus::Acknowledged => "acknowledged",
            AlarmStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(AlarmStatus::Open),
            "acknowledged" => Some(AlarmStatus::Acknowledged),
            "resolved" => Some(AlarmStatus::Resolved),
            _ => None,
        }
    }

    /// Open or acknowledged alarms count as active for dedup purposes.
    pub fn is_active(self) -> bool {
        matches!(self, AlarmStatus::Open | AlarmStatus::Acknowledged)
    }
}

/// A persisted alarm. `metadata.incident_key` carries the dedup key for
/// incident alarms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub sensor_id: Option<Uuid>,
    pub prediction_id: Option<Uuid>,
    pub severity: AlarmSeverity,
    pub status: AlarmStatus,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Alarm {
    pub fn incident_key(&self) -> Option<&str> {
        self.metadata
            .get("incident_key")
            .and_then(serde_json::Value::as_str)
    }
}

/// Payload for creating an alarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmCreate {
    pub machine_id: Uuid,
    pub sensor_id: Option<Uuid>,
    pub prediction_id: Option<Uuid>,
    pub severity: AlarmSeverity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Workflow record attached to an incident alarm; at most one per
/// incident key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub alarm_id: Uuid,
    pub machine_id: Uuid,
    pub title: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Deterministic incident keys for the wear-profile policy.
pub mod incident_keys {
    use uuid::Uuid;

    pub fn early_wear(machine_id: Uuid) -> String {
        format!("{machine_id}:profile1:early_wear")
    }

    pub fn advanced_wear(machine_id: Uuid) -> String {
        format!("{machine_id}:profile2:advanced_wear")
    }

    pub fn fault_event(machine_id: Uuid) -> String {
        format!("{machine_id}:profile3:fault_event")
    }
}

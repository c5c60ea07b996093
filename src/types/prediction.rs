//! Prediction records and the ML adapter's reply shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Typed view of the anomaly service's schema-loose reply.
///
/// Unknown fields are retained in [`MlReply::raw`] for forensics but are
/// never interpreted. An unreachable or failing service yields
/// [`MlReply::empty`] and the pipeline proceeds without the ML signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MlReply {
    pub status: Option<String>,
    pub prediction: Option<String>,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub anomaly_type: Option<String>,
    pub model_version: Option<String>,
    /// Remaining useful life estimate (0-100).
    pub rul: Option<f64>,
    pub response_time_ms: Option<f64>,
    /// metric name -> contribution weight. Non-numeric entries from the
    /// service survive only in `raw`.
    #[serde(default)]
    pub contributing_features: BTreeMap<String, f64>,
    /// Verbatim service reply.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl MlReply {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_null() || self.raw == serde_json::json!({})
    }

    /// Parse a free-form JSON map into the typed reply, keeping the
    /// original value verbatim.
    pub fn from_value(value: serde_json::Value) -> Self {
        let get_str = |k: &str| value.get(k).and_then(serde_json::Value::as_str).map(String::from);
        let get_f64 = |k: &str| value.get(k).and_then(serde_json::Value::as_f64);

        let contributing_features = value
            .get("contributing_features")
            .and_then(serde_json::Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            status: get_str("status"),
            prediction: get_str("prediction"),
            score: get_f64("score"),
            confidence: get_f64("confidence"),
            anomaly_type: get_str("anomaly_type"),
            model_version: get_str("model_version"),
            rul: get_f64("rul"),
            response_time_ms: get_f64("response_time_ms"),
            contributing_features,
            raw: value,
        }
    }

    /// Wear-risk score derived from the RUL estimate, clamped to [0, 1].
    pub fn wear_risk_score(&self) -> f64 {
        match self.rul {
            Some(rul) => (1.0 - rul / 100.0).clamp(0.0, 1.0),
            None => 0.0,
        }
    }
}

/// Snapshot of one evaluation tick, persisted append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub sensor_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub prediction: String,
    pub status: String,
    pub score: f64,
    pub confidence: f64,
    pub anomaly_type: Option<String>,
    pub model_version: String,
    pub remaining_useful_life: Option<f64>,
    pub response_time_ms: f64,
    #[serde(default)]
    pub contributing_features: BTreeMap<String, f64>,
    /// Free metadata bag: raw readings, derived features, drift score,
    /// verbatim ML reply, computed severities.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_parses_known_keys_and_keeps_raw() {
        let value = serde_json::json!({
            "status": "anomaly",
            "score": 0.85,
            "confidence": 0.9,
            "model_version": "if-2.3",
            "rul": 40.0,
            "contributing_features": {"Pressure_bar": 0.7, "note": "text"},
            "vendor_debug": {"nested": true}
        });
        let reply = MlReply::from_value(value.clone());
        assert_eq!(reply.status.as_deref(), Some("anomaly"));
        assert_eq!(reply.score, Some(0.85));
        assert_eq!(reply.contributing_features.len(), 1);
        assert_eq!(reply.contributing_features["Pressure_bar"], 0.7);
        assert_eq!(reply.raw, value);
        assert!((reply.wear_risk_score() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn empty_reply_is_neutral() {
        let reply = MlReply::empty();
        assert!(reply.is_empty());
        assert_eq!(reply.score, None);
        assert_eq!(reply.wear_risk_score(), 0.0);
    }
}

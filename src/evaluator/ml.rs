//! ML advisory extraction from recent predictions.
//!
//! The ML signal is advisory only: a high anomaly score raises a warning
//! flag but never changes a severity or the overall risk.

use std::collections::BTreeMap;

use crate::config::defaults::ML_WARNING_THRESHOLD;
use crate::types::{metrics, Prediction};

/// Per-metric anomaly scores plus the overall warning flag, extracted from
/// the recent prediction history (newest first, already limited by the
/// store query).
pub fn ml_scores(predictions: &[Prediction]) -> (BTreeMap<String, f64>, bool) {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    let mut overall_warning = false;

    for prediction in predictions {
        let overall = prediction
            .metadata
            .get("anomaly_score")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(prediction.score);
        if overall > ML_WARNING_THRESHOLD {
            overall_warning = true;
        }

        for (metric, contribution) in &prediction.contributing_features {
            if !metrics::BASELINE_METRICS.contains(&metric.as_str()) {
                continue;
            }
            let score = contribution.clamp(0.0, 1.0);
            scores
                .entry(metric.clone())
                .and_modify(|existing| *existing = existing.max(score))
                .or_insert(score);
        }
    }

    (scores, overall_warning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn prediction(score: f64, features: &[(&str, f64)]) -> Prediction {
        Prediction {
            id: Uuid::new_v4(),
            machine_id: Uuid::new_v4(),
            sensor_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            prediction: "normal".into(),
            status: "normal".into(),
            score,
            confidence: 0.8,
            anomaly_type: None,
            model_version: "if-1.0".into(),
            remaining_useful_life: None,
            response_time_ms: 12.0,
            contributing_features: features
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
            metadata: serde_json::json!({"anomaly_score": score}),
        }
    }

    #[test]
    fn per_metric_scores_take_the_max() {
        let preds = vec![
            prediction(0.2, &[("Pressure_bar", 0.4)]),
            prediction(0.3, &[("Pressure_bar", 0.85), ("Temp_Avg", 0.1)]),
        ];
        let (scores, warning) = ml_scores(&preds);
        assert_eq!(scores["Pressure_bar"], 0.85);
        assert_eq!(scores["Temp_Avg"], 0.1);
        assert!(!warning);
    }

    #[test]
    fn overall_warning_from_high_anomaly_score() {
        let preds = vec![prediction(0.75, &[])];
        let (_, warning) = ml_scores(&preds);
        assert!(warning);
    }

    #[test]
    fn unknown_feature_names_are_ignored() {
        let preds = vec![prediction(0.1, &[("Torque_Nm", 0.99)])];
        let (scores, _) = ml_scores(&preds);
        assert!(scores.is_empty());
    }
}

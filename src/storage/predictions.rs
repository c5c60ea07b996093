//! Append-only prediction history.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::Prediction;

use super::{Store, StorageError};

fn prediction_from_row(row: &PgRow) -> Result<Prediction, sqlx::Error> {
    let contributing: serde_json::Value = row.try_get("contributing_features")?;
    let contributing_features: BTreeMap<String, f64> = contributing
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                .collect()
        })
        .unwrap_or_default();

    Ok(Prediction {
        id: row.try_get("id")?,
        machine_id: row.try_get("machine_id")?,
        sensor_id: row.try_get("sensor_id")?,
        timestamp: row.try_get("timestamp")?,
        prediction: row.try_get("prediction")?,
        status: row.try_get("status")?,
        score: row.try_get("score")?,
        confidence: row.try_get("confidence")?,
        anomaly_type: row.try_get("anomaly_type")?,
        model_version: row.try_get("model_version")?,
        remaining_useful_life: row.try_get("remaining_useful_life")?,
        response_time_ms: row.try_get("response_time_ms")?,
        contributing_features,
        metadata: row.try_get("metadata")?,
    })
}

impl Store {
    pub async fn insert_prediction(&self, prediction: &Prediction) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO predictions
             (id, machine_id, sensor_id, timestamp, prediction, status, score, confidence,
              anomaly_type, model_version, remaining_useful_life, response_time_ms,
              contributing_features, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(prediction.id)
        .bind(prediction.machine_id)
        .bind(prediction.sensor_id)
        .bind(prediction.timestamp)
        .bind(&prediction.prediction)
        .bind(&prediction.status)
        .bind(prediction.score)
        .bind(prediction.confidence)
        .bind(&prediction.anomaly_type)
        .bind(&prediction.model_version)
        .bind(prediction.remaining_useful_life)
        .bind(prediction.response_time_ms)
        .bind(serde_json::to_value(&prediction.contributing_features).unwrap_or_default())
        .bind(&prediction.metadata)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Most recent predictions for a machine since a cutoff, newest first.
    pub async fn recent_predictions(
        &self,
        machine_id: Uuid,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Prediction>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, machine_id, sensor_id, timestamp, prediction, status, score, confidence,
                    anomaly_type, model_version, remaining_useful_life, response_time_ms,
                    contributing_features, metadata
             FROM predictions
             WHERE machine_id = $1 AND timestamp >= $2
             ORDER BY timestamp DESC
             LIMIT $3",
        )
        .bind(machine_id)
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(prediction_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub async fn latest_prediction(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<Prediction>, StorageError> {
        let row = sqlx::query(
            "SELECT id, machine_id, sensor_id, timestamp, prediction, status, score, confidence,
                    anomaly_type, model_version, remaining_useful_life, response_time_ms,
                    contributing_features, metadata
             FROM predictions
             WHERE machine_id = $1
             ORDER BY timestamp DESC
             LIMIT 1",
        )
        .bind(machine_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| prediction_from_row(&r))
            .transpose()
            .map_err(Into::into)
    }
}

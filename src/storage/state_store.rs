//! Machine-state persistence: snapshots, append-only transitions, alerts,
//! per-machine thresholds, and time-in-state statistics.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::{
    MachineState, MachineStateInfo, StateAlert, StateStatistics, StateThresholds, StateTransition,
};

use super::{Store, StorageError};

fn transition_from_row(row: &PgRow) -> Result<StateTransition, sqlx::Error> {
    let from_state: Option<String> = row.try_get("from_state")?;
    let to_state: String = row.try_get("to_state")?;
    Ok(StateTransition {
        machine_id: row.try_get("machine_id")?,
        from_state: from_state
            .as_deref()
            .and_then(MachineState::parse)
            .unwrap_or_default(),
        to_state: MachineState::parse(&to_state).unwrap_or_default(),
        transition_time: row.try_get("transition_time")?,
        previous_state_duration_seconds: row.try_get("previous_state_duration")?,
        confidence_before: row.try_get("confidence_before")?,
        confidence_after: row.try_get("confidence_after")?,
        sensor_data: row.try_get("sensor_data")?,
        reason: row.try_get("reason")?,
    })
}

impl Store {
    /// Persist a machine-state snapshot (written on every transition).
    pub async fn record_machine_state(
        &self,
        machine_id: Uuid,
        info: &MachineStateInfo,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO machine_states
             (id, machine_id, state, confidence, state_since, last_updated, metrics, flags)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(machine_id)
        .bind(info.state.as_str())
        .bind(info.confidence)
        .bind(info.state_since)
        .bind(info.last_updated)
        .bind(serde_json::to_value(&info.metrics).unwrap_or_default())
        .bind(serde_json::to_value(&info.flags).unwrap_or_default())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Append a state transition (append-only history).
    pub async fn record_transition(&self, t: &StateTransition) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO machine_state_transitions
             (id, machine_id, from_state, to_state, transition_time, previous_state_duration,
              confidence_before, confidence_after, sensor_data, reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::new_v4())
        .bind(t.machine_id)
        .bind(t.from_state.as_str())
        .bind(t.to_state.as_str())
        .bind(t.transition_time)
        .bind(t.previous_state_duration_seconds)
        .bind(t.confidence_before)
        .bind(t.confidence_after)
        .bind(&t.sensor_data)
        .bind(&t.reason)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn record_state_alert(&self, alert: &StateAlert) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO machine_state_alerts
             (id, machine_id, alert_type, severity, title, message, state, previous_state, alert_time)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(Uuid::new_v4())
        .bind(alert.machine_id)
        .bind(&alert.alert_type)
        .bind(&alert.severity)
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.state.as_str())
        .bind(alert.previous_state.map(MachineState::as_str))
        .bind(alert.alert_time)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Latest transition for detector hydration on first access.
    pub async fn latest_transition(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<StateTransition>, StorageError> {
        let row = sqlx::query(
            "SELECT machine_id, from_state, to_state, transition_time, previous_state_duration,
                    confidence_before, confidence_after, sensor_data, reason
             FROM machine_state_transitions
             WHERE machine_id = $1
             ORDER BY transition_time DESC
             LIMIT 1",
        )
        .bind(machine_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| transition_from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn state_history(
        &self,
        machine_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<StateTransition>, StorageError> {
        let rows = sqlx::query(
            "SELECT machine_id, from_state, to_state, transition_time, previous_state_duration,
                    confidence_before, confidence_after, sensor_data, reason
             FROM machine_state_transitions
             WHERE machine_id = $1
               AND ($2::timestamptz IS NULL OR transition_time >= $2)
               AND ($3::timestamptz IS NULL OR transition_time <= $3)
             ORDER BY transition_time DESC
             LIMIT $4",
        )
        .bind(machine_id)
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(transition_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Time-in-state statistics over a period, computed from transitions.
    pub async fn state_statistics(
        &self,
        machine_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<StateStatistics, StorageError> {
        let mut transitions = self
            .state_history(machine_id, Some(start), Some(end), 10_000)
            .await?;
        transitions.sort_by_key(|t| t.transition_time);
        Ok(compute_state_statistics(machine_id, start, end, &transitions))
    }

    // ------------------------------------------------------------------
    // Per-machine thresholds
    // ------------------------------------------------------------------

    pub async fn get_state_thresholds(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<StateThresholds>, StorageError> {
        let row = sqlx::query(
            "SELECT thresholds FROM machine_state_thresholds WHERE machine_id = $1",
        )
        .bind(machine_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.and_then(|r| {
            let value: serde_json::Value = r.get("thresholds");
            serde_json::from_value(value).ok()
        }))
    }

    pub async fn put_state_thresholds(
        &self,
        machine_id: Uuid,
        thresholds: &StateThresholds,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO machine_state_thresholds (machine_id, thresholds, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (machine_id) DO UPDATE
             SET thresholds = EXCLUDED.thresholds, updated_at = now()",
        )
        .bind(machine_id)
        .bind(serde_json::to_value(thresholds).unwrap_or_default())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

/// Fold an ordered transition list into per-state durations and
/// production-cycle statistics.
pub fn compute_state_statistics(
    machine_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    transitions: &[StateTransition],
) -> StateStatistics {
    let total_seconds = (end - start).num_seconds().max(0) as f64;
    let mut state_seconds: BTreeMap<String, f64> = [
        ("OFF", 0.0),
        ("HEATING", 0.0),
        ("IDLE", 0.0),
        ("PRODUCTION", 0.0),
        ("COOLING", 0.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let mut production_durations: Vec<f64> = Vec::new();

    for (i, transition) in transitions.iter().enumerate() {
        let segment_start = transition.transition_time.max(start);
        let segment_end = transitions
            .get(i + 1)
            .map_or(end, |next| next.transition_time.min(end));
        let duration = (segment_end - segment_start).num_seconds().max(0) as f64;

        if let Some(seconds) = state_seconds.get_mut(transition.to_state.as_str()) {
            *seconds += duration;
        }
        if transition.to_state.is_production() {
            production_durations.push(duration);
        }
    }

    let state_percentages = state_seconds
        .iter()
        .map(|(state, seconds)| {
            let pct = if total_seconds > 0.0 {
                seconds / total_seconds * 100.0
            } else {
                0.0
            };
            (state.clone(), pct)
        })
        .collect();

    let total_production: f64 = production_durations.iter().sum();
    let avg_production = if production_durations.is_empty() {
        0.0
    } else {
        total_production / production_durations.len() as f64
    };

    StateStatistics {
        machine_id,
        start_time: Some(start),
        end_time: Some(end),
        state_seconds,
        state_percentages,
        total_transitions: transitions.len(),
        production_cycles: production_durations.len(),
        avg_production_duration_seconds: avg_production,
        total_production_seconds: total_production,
    }
}

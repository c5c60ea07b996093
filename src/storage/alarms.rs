//! Alarms and tickets, including transactional incident application.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::incident::IncidentAction;
use crate::types::{Alarm, AlarmCreate, AlarmSeverity, AlarmStatus, Ticket};

use super::{Store, StorageError};

fn alarm_from_row(row: &PgRow) -> Result<Alarm, sqlx::Error> {
    let severity: String = row.try_get("severity")?;
    let status: String = row.try_get("status")?;
    Ok(Alarm {
        id: row.try_get("id")?,
        machine_id: row.try_get("machine_id")?,
        sensor_id: row.try_get("sensor_id")?,
        prediction_id: row.try_get("prediction_id")?,
        severity: if severity == "critical" {
            AlarmSeverity::Critical
        } else {
            AlarmSeverity::Warning
        },
        status: AlarmStatus::parse(&status).unwrap_or(AlarmStatus::Open),
        message: row.try_get("message")?,
        triggered_at: row.try_get("triggered_at")?,
        resolved_at: row.try_get("resolved_at")?,
        metadata: row.try_get("metadata")?,
    })
}

const ALARM_COLUMNS: &str = "id, machine_id, sensor_id, prediction_id, severity, status, message, \
                             triggered_at, resolved_at, metadata";

impl Store {
    /// Create an alarm. With `check_baseline_learning` the machine's active
    /// profile is consulted first and the alarm is suppressed while it is
    /// learning.
    pub async fn create_alarm(
        &self,
        payload: AlarmCreate,
        check_baseline_learning: bool,
    ) -> Result<Option<Alarm>, StorageError> {
        if check_baseline_learning {
            if let Some(machine) = self.get_machine(payload.machine_id).await? {
                let material = machine.current_material();
                match self.is_baseline_learning(machine.id, &material).await {
                    Ok(true) => {
                        debug!(
                            machine_id = %payload.machine_id,
                            "Suppressing alarm during baseline learning"
                        );
                        return Ok(None);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Baseline-learning check failed; alarm proceeds"),
                }
            }
        }

        let alarm_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO alarms
             (id, machine_id, sensor_id, prediction_id, severity, status, message, triggered_at, metadata)
             VALUES ($1, $2, $3, $4, $5, 'open', $6, $7, $8)",
        )
        .bind(alarm_id)
        .bind(payload.machine_id)
        .bind(payload.sensor_id)
        .bind(payload.prediction_id)
        .bind(payload.severity.as_str())
        .bind(&payload.message)
        .bind(payload.triggered_at)
        .bind(&payload.metadata)
        .execute(self.pool())
        .await?;

        self.get_alarm(alarm_id).await
    }

    pub async fn get_alarm(&self, alarm_id: Uuid) -> Result<Option<Alarm>, StorageError> {
        let row = sqlx::query(&format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE id = $1"))
            .bind(alarm_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| alarm_from_row(&r)).transpose().map_err(Into::into)
    }

    /// Open/acknowledged alarm with the given incident key, if any.
    pub async fn get_active_alarm_by_incident_key(
        &self,
        machine_id: Uuid,
        incident_key: &str,
    ) -> Result<Option<Alarm>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ALARM_COLUMNS} FROM alarms
             WHERE machine_id = $1
               AND status IN ('open', 'acknowledged')
               AND metadata->>'incident_key' = $2
             LIMIT 1"
        ))
        .bind(machine_id)
        .bind(incident_key)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| alarm_from_row(&r)).transpose().map_err(Into::into)
    }

    /// Any alarm ever created with the given incident key (dedup-forever).
    pub async fn get_alarm_by_incident_key(
        &self,
        machine_id: Uuid,
        incident_key: &str,
    ) -> Result<Option<Alarm>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ALARM_COLUMNS} FROM alarms
             WHERE machine_id = $1 AND metadata->>'incident_key' = $2
             LIMIT 1"
        ))
        .bind(machine_id)
        .bind(incident_key)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| alarm_from_row(&r)).transpose().map_err(Into::into)
    }

    /// Active alarms carrying an incident key for one machine.
    pub async fn list_active_incident_alarms(
        &self,
        machine_id: Uuid,
    ) -> Result<Vec<Alarm>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ALARM_COLUMNS} FROM alarms
             WHERE machine_id = $1
               AND status IN ('open', 'acknowledged')
               AND metadata->>'incident_key' IS NOT NULL
             ORDER BY triggered_at"
        ))
        .bind(machine_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(alarm_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Resolve an alarm, attaching resolution notes to its metadata.
    pub async fn resolve_alarm(
        &self,
        alarm_id: Uuid,
        notes: Option<&str>,
    ) -> Result<Option<Alarm>, StorageError> {
        let patch = match notes {
            Some(n) => serde_json::json!({ "resolution_notes": n }),
            None => serde_json::json!({}),
        };
        sqlx::query(
            "UPDATE alarms
             SET status = 'resolved', resolved_at = $2, metadata = metadata || $3
             WHERE id = $1",
        )
        .bind(alarm_id)
        .bind(Utc::now())
        .bind(patch)
        .execute(self.pool())
        .await?;
        self.get_alarm(alarm_id).await
    }

    pub async fn count_active_alarms(&self) -> Result<i64, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM alarms WHERE status IN ('open', 'acknowledged')",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Destructive: delete all alarms and tickets (reset-state command).
    pub async fn delete_all_alarms_and_tickets(&self) -> Result<(), StorageError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM tickets").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM alarms").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    /// At most one ticket per alarm (and thus per incident key).
    pub async fn ensure_ticket_for_alarm(&self, alarm: &Alarm) -> Result<Ticket, StorageError> {
        let existing = sqlx::query(
            "SELECT id, alarm_id, machine_id, title, status, created_at
             FROM tickets WHERE alarm_id = $1",
        )
        .bind(alarm.id)
        .fetch_optional(self.pool())
        .await?;
        if let Some(row) = existing {
            return Ok(Ticket {
                id: row.try_get("id")?,
                alarm_id: row.try_get("alarm_id")?,
                machine_id: row.try_get("machine_id")?,
                title: row.try_get("title")?,
                status: row.try_get("status")?,
                created_at: row.try_get("created_at")?,
            });
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tickets (id, alarm_id, machine_id, title, status)
             VALUES ($1, $2, $3, $4, 'open')
             ON CONFLICT (alarm_id) DO NOTHING",
        )
        .bind(id)
        .bind(alarm.id)
        .bind(alarm.machine_id)
        .bind(&alarm.message)
        .execute(self.pool())
        .await?;

        let row = sqlx::query(
            "SELECT id, alarm_id, machine_id, title, status, created_at
             FROM tickets WHERE alarm_id = $1",
        )
        .bind(alarm.id)
        .fetch_one(self.pool())
        .await?;
        Ok(Ticket {
            id: row.try_get("id")?,
            alarm_id: row.try_get("alarm_id")?,
            machine_id: row.try_get("machine_id")?,
            title: row.try_get("title")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }

    // ------------------------------------------------------------------
    // Incident application
    // ------------------------------------------------------------------

    /// Apply planned incident actions. The dedup check and the alarm insert
    /// run inside one transaction per action. Returns the incident keys of
    /// alarms actually created, for the manager's cooldown bookkeeping.
    pub async fn apply_incident_actions(
        &self,
        machine_id: Uuid,
        actions: &[IncidentAction],
    ) -> Result<Vec<String>, StorageError> {
        let mut created = Vec::new();

        for action in actions {
            match action {
                IncidentAction::ResolveIncidents { note } => {
                    let active = self.list_active_incident_alarms(machine_id).await?;
                    for alarm in active {
                        self.resolve_alarm(alarm.id, Some(note)).await?;
                        warn!(
                            machine_id = %machine_id,
                            alarm_id = %alarm.id,
                            "Incident alarm resolved"
                        );
                    }
                }
                IncidentAction::EnsureAlarm {
                    incident_key,
                    severity,
                    message,
                    triggered_at,
                    create_ticket,
                    dedup_forever,
                } => {
                    // Learning suppression precedes any dedup or insert.
                    if let Some(machine) = self.get_machine(machine_id).await? {
                        let material = machine.current_material();
                        if self
                            .is_baseline_learning(machine_id, &material)
                            .await
                            .unwrap_or(false)
                        {
                            debug!(
                                machine_id = %machine_id,
                                incident_key = %incident_key,
                                "Incident alarm suppressed during baseline learning"
                            );
                            continue;
                        }
                    }

                    let mut tx = self.pool().begin().await?;
                    let dedup_sql = if *dedup_forever {
                        "SELECT id FROM alarms
                         WHERE machine_id = $1 AND metadata->>'incident_key' = $2
                         LIMIT 1"
                    } else {
                        "SELECT id FROM alarms
                         WHERE machine_id = $1
                           AND status IN ('open', 'acknowledged')
                           AND metadata->>'incident_key' = $2
                         LIMIT 1"
                    };
                    let existing = sqlx::query(dedup_sql)
                        .bind(machine_id)
                        .bind(incident_key)
                        .fetch_optional(&mut *tx)
                        .await?;
                    if existing.is_some() {
                        tx.rollback().await?;
                        continue;
                    }

                    let alarm_id = Uuid::new_v4();
                    sqlx::query(
                        "INSERT INTO alarms
                         (id, machine_id, sensor_id, prediction_id, severity, status, message,
                          triggered_at, metadata)
                         VALUES ($1, $2, NULL, NULL, $3, 'open', $4, $5, $6)",
                    )
                    .bind(alarm_id)
                    .bind(machine_id)
                    .bind(severity.as_str())
                    .bind(message)
                    .bind(triggered_at)
                    .bind(serde_json::json!({ "incident_key": incident_key }))
                    .execute(&mut *tx)
                    .await?;

                    if *create_ticket {
                        sqlx::query(
                            "INSERT INTO tickets (id, alarm_id, machine_id, title, status)
                             VALUES ($1, $2, $3, $4, 'open')
                             ON CONFLICT (alarm_id) DO NOTHING",
                        )
                        .bind(Uuid::new_v4())
                        .bind(alarm_id)
                        .bind(machine_id)
                        .bind(message)
                        .execute(&mut *tx)
                        .await?;
                    }
                    tx.commit().await?;

                    warn!(
                        machine_id = %machine_id,
                        incident_key = %incident_key,
                        severity = severity.as_str(),
                        "Incident alarm created"
                    );
                    created.push(incident_key.clone());
                }
            }
        }

        Ok(created)
    }
}

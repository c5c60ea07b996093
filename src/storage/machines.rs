//! Machine and sensor records.

use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::config::defaults::{DEFAULT_MACHINE_NAME, DEFAULT_SENSOR_NAME};
use crate::config::HistorianConfig;
use crate::types::{Machine, Sensor};

use super::{Store, StorageError};

pub(crate) fn machine_from_row(row: &PgRow) -> Result<Machine, sqlx::Error> {
    Ok(Machine {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: row.try_get("status")?,
        criticality: row.try_get("criticality")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn get_machine(&self, machine_id: Uuid) -> Result<Option<Machine>, StorageError> {
        let row = sqlx::query(
            "SELECT id, name, status, criticality, metadata, created_at FROM machines WHERE id = $1",
        )
        .bind(machine_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| machine_from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn get_machine_by_name(&self, name: &str) -> Result<Option<Machine>, StorageError> {
        let row = sqlx::query(
            "SELECT id, name, status, criticality, metadata, created_at FROM machines WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| machine_from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn list_machines(&self) -> Result<Vec<Machine>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, name, status, criticality, metadata, created_at FROM machines ORDER BY name",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(machine_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub async fn list_sensors(&self, machine_id: Uuid) -> Result<Vec<Sensor>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, machine_id, name, sensor_type, unit, warning_threshold,
                    critical_threshold, metadata
             FROM sensors WHERE machine_id = $1 ORDER BY name",
        )
        .bind(machine_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Sensor {
                    id: row.try_get("id")?,
                    machine_id: row.try_get("machine_id")?,
                    name: row.try_get("name")?,
                    sensor_type: row.try_get("sensor_type")?,
                    unit: row.try_get("unit")?,
                    warning_threshold: row.try_get("warning_threshold")?,
                    critical_threshold: row.try_get("critical_threshold")?,
                    metadata: row.try_get("metadata")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(Into::into)
    }

    /// Merge keys into the machine's metadata.
    pub async fn update_machine_metadata(
        &self,
        machine_id: Uuid,
        patch: &serde_json::Value,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE machines SET metadata = metadata || $2 WHERE id = $1")
            .bind(machine_id)
            .bind(patch)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Ensure the historian-fed machine and its sensor-of-record exist,
    /// stamping the metadata downstream logic relies on.
    pub async fn ensure_extruder_machine(
        &self,
        config: &HistorianConfig,
    ) -> Result<(Uuid, Uuid), StorageError> {
        let machine_id = match self.get_machine_by_name(DEFAULT_MACHINE_NAME).await? {
            Some(machine) => {
                let meta_type = machine
                    .metadata
                    .get("machine_type")
                    .and_then(serde_json::Value::as_str);
                if meta_type != Some("extruder") {
                    self.update_machine_metadata(
                        machine.id,
                        &serde_json::json!({"machine_type": "extruder", "type": "extruder"}),
                    )
                    .await?;
                }
                machine.id
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO machines (id, name, status, criticality, metadata)
                     VALUES ($1, $2, 'online', 'high', $3)",
                )
                .bind(id)
                .bind(DEFAULT_MACHINE_NAME)
                .bind(serde_json::json!({
                    "source": "mssql",
                    "machine_type": "extruder",
                    "type": "extruder",
                    "mssql_database": config.database,
                    "mssql_table": config.table,
                }))
                .execute(self.pool())
                .await?;
                id
            }
        };

        let sensor_row = sqlx::query("SELECT id FROM sensors WHERE name = $1")
            .bind(DEFAULT_SENSOR_NAME)
            .fetch_optional(self.pool())
            .await?;
        let sensor_id = match sensor_row {
            Some(row) => row.try_get("id")?,
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO sensors (id, machine_id, name, sensor_type, unit, metadata)
                     VALUES ($1, $2, $3, 'extruder_sql', NULL, $4)",
                )
                .bind(id)
                .bind(machine_id)
                .bind(DEFAULT_SENSOR_NAME)
                .bind(serde_json::json!({
                    "source": "mssql",
                    "columns": config.value_columns,
                    "trend_column": config.trend_column,
                }))
                .execute(self.pool())
                .await?;
                id
            }
        };

        Ok((machine_id, sensor_id))
    }
}

//! Typed key/value settings store.
//!
//! Values are persisted as text with a declared type in
//! {string, json, int, bool}. The historian connection blob under
//! `connections.mssql` overrides the environment bootstrap and is reloaded
//! by the poller every 30 s.

use sqlx::Row;

use super::{Store, StorageError};

/// A settings entry as stored.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Setting {
    pub key: String,
    pub value_type: String,
    pub value: String,
}

impl Store {
    pub async fn get_setting(&self, key: &str) -> Result<Option<Setting>, StorageError> {
        let row = sqlx::query("SELECT key, value_type, value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| Setting {
            key: r.get("key"),
            value_type: r.get("value_type"),
            value: r.get("value"),
        }))
    }

    /// JSON-typed setting, parsed. Non-json or unparsable values yield None.
    pub async fn get_setting_json(
        &self,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let setting = self.get_setting(key).await?;
        Ok(setting
            .filter(|s| s.value_type == "json")
            .and_then(|s| serde_json::from_str(&s.value).ok()))
    }

    pub async fn put_setting(
        &self,
        key: &str,
        value_type: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO settings (key, value_type, value, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (key) DO UPDATE
             SET value_type = EXCLUDED.value_type,
                 value = EXCLUDED.value,
                 updated_at = now()",
        )
        .bind(key)
        .bind(value_type)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn put_setting_json(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StorageError> {
        self.put_setting(key, "json", &value.to_string()).await
    }

    pub async fn list_settings(&self) -> Result<Vec<Setting>, StorageError> {
        let rows = sqlx::query("SELECT key, value_type, value FROM settings ORDER BY key")
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Setting {
                key: r.get("key"),
                value_type: r.get("value_type"),
                value: r.get("value"),
            })
            .collect())
    }
}

//! Durable key/value store for UI-editable app settings.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

#[derive(Debug, sqlx::FromRow)]
struct SettingRow {
    key: String,
    value_json: String,
}

#[derive(Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
}

impl SettingsStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_settings (
              key TEXT PRIMARY KEY,
              value_json TEXT NOT NULL,
              updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, JsonValue>> {
        let rows = sqlx::query_as::<_, SettingRow>("SELECT key, value_json FROM app_settings")
            .fetch_all(&self.pool)
            .await?;

        let mut out = BTreeMap::new();
        for row in rows {
            let value = serde_json::from_str(&row.value_json).unwrap_or(JsonValue::Null);
            out.insert(row.key, value);
        }
        Ok(out)
    }

    pub async fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT value_json FROM app_settings WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|raw| serde_json::from_str(&raw).unwrap_or(JsonValue::Null)))
    }

    pub async fn set(&self, key: &str, value: &JsonValue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
              value_json = excluded.value_json,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

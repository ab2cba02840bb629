//! SQLite-backed [`KvStore`].
//!
//! One `kv` table holds document records, pending ingestions, plan
//! assignments and usage counters. Counters are updated with a single
//! `INSERT .. ON CONFLICT .. RETURNING` statement, so concurrent
//! increments from several processes never lose an update.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use manual_harness_core::error::{RagError, Result};
use manual_harness_core::kv::{parse_counter, KvStore};

pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(RagError::storage)?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(RagError::storage)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO kv (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = CAST(CAST(kv.value AS INTEGER) + CAST(excluded.value AS INTEGER) AS TEXT)
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(delta.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(RagError::storage)?;
        let value: String = row.get("value");
        parse_counter(key, Some(&value))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT key, value FROM kv WHERE substr(key, 1, length(?)) = ? ORDER BY key ASC",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::storage)?;
        Ok(rows
            .iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }
}

//! Schema creation. Every statement is idempotent, so this runs on every
//! start as well as from `mh init`.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Document records, pending ingestions, plan assignments, usage counters
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per chunk embedding, always qualified by tenant
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            tenant_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            span_start INTEGER NOT NULL,
            span_end INTEGER NOT NULL,
            content_hash TEXT NOT NULL DEFAULT '',
            embedding BLOB NOT NULL,
            PRIMARY KEY (tenant_id, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document ON chunk_vectors(tenant_id, document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

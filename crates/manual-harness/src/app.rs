//! Service construction from configuration.
//!
//! Wires the SQLite adapters, the configured embedding and generation
//! backends and the plan catalog into a [`RagService`], then restores the
//! in-memory lexical index from the persisted document records.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use manual_harness_core::service::{RagService, ServiceParts};
use manual_harness_core::usage::SystemClock;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::migrate;
use crate::sqlite_kv::SqliteKv;
use crate::sqlite_store::SqliteVectorStore;

/// Connect and make sure the schema exists.
pub async fn open_database(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}

/// Build a ready-to-use service over `pool`.
pub async fn build_service(config: &Config, pool: SqlitePool) -> Result<RagService> {
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let plans = config.plans.catalog()?;

    let parts = ServiceParts {
        kv: Arc::new(SqliteKv::new(pool.clone())),
        vectors: Arc::new(SqliteVectorStore::new(pool)),
        embedder,
        generator,
        clock: Arc::new(SystemClock),
        plans,
    };
    let service = RagService::new(parts, config.service_config())?;
    let documents = service
        .rebuild_lexical_index()
        .await
        .context("Failed to rebuild lexical index")?;
    info!(
        documents,
        embedding = %config.embedding.provider,
        generation = %config.generation.provider,
        "Service ready"
    );
    Ok(service)
}

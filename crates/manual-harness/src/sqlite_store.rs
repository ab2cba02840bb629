//! SQLite-backed [`VectorStore`].
//!
//! Embeddings live in the `chunk_vectors` table as little-endian `f32`
//! BLOBs next to the chunk's citation metadata. Every statement filters
//! on `tenant_id`; search is brute-force cosine similarity over the
//! tenant's rows, and the tenant read back from each row is checked with
//! [`verify_hits`] before anything is returned.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use manual_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use manual_harness_core::error::{RagError, Result};
use manual_harness_core::models::{ChunkMetadata, EmbeddingRecord, Span, TenantId};
use manual_harness_core::store::{check_record, verify_hits, VectorHit, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const INSERT_VECTOR: &str = r#"
    INSERT INTO chunk_vectors (tenant_id, chunk_id, document_id, filename, chunk_index,
                               text, span_start, span_end, content_hash, embedding)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(tenant_id, chunk_id) DO UPDATE SET
        document_id = excluded.document_id,
        filename = excluded.filename,
        chunk_index = excluded.chunk_index,
        text = excluded.text,
        span_start = excluded.span_start,
        span_end = excluded.span_end,
        content_hash = excluded.content_hash,
        embedding = excluded.embedding
"#;

const SELECT_VECTORS: &str = r#"
    SELECT tenant_id, chunk_id, document_id, filename, chunk_index,
           text, span_start, span_end, content_hash, embedding
    FROM chunk_vectors
"#;

fn insert_query<'q>(
    tenant: &'q TenantId,
    record: &'q EmbeddingRecord,
    blob: Vec<u8>,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    let meta = &record.metadata;
    sqlx::query(INSERT_VECTOR)
        .bind(tenant.as_str())
        .bind(&record.chunk_id)
        .bind(&meta.document_id)
        .bind(&meta.filename)
        .bind(meta.chunk_index as i64)
        .bind(&meta.text)
        .bind(meta.span.start as i64)
        .bind(meta.span.end as i64)
        .bind(&meta.content_hash)
        .bind(blob)
}

fn row_to_record(row: &SqliteRow) -> Result<EmbeddingRecord> {
    let tenant: String = row.get("tenant_id");
    let blob: Vec<u8> = row.get("embedding");
    let chunk_index: i64 = row.get("chunk_index");
    let span_start: i64 = row.get("span_start");
    let span_end: i64 = row.get("span_end");
    Ok(EmbeddingRecord {
        chunk_id: row.get("chunk_id"),
        vector: blob_to_vec(&blob),
        metadata: ChunkMetadata {
            tenant: TenantId::new(tenant)?,
            document_id: row.get("document_id"),
            filename: row.get("filename"),
            chunk_index: chunk_index.max(0) as usize,
            text: row.get("text"),
            span: Span {
                start: span_start.max(0) as usize,
                end: span_end.max(0) as usize,
            },
            content_hash: row.get("content_hash"),
        },
    })
}

fn row_to_hit(row: &SqliteRow, query: &[f32]) -> Result<VectorHit> {
    let record = row_to_record(row)?;
    Ok(VectorHit {
        score: cosine_similarity(query, &record.vector),
        chunk_id: record.chunk_id,
        metadata: record.metadata,
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, tenant: &TenantId, record: EmbeddingRecord) -> Result<()> {
        check_record(tenant, None, &record)?;
        let blob = vec_to_blob(&record.vector);
        insert_query(tenant, &record, blob)
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;
        Ok(())
    }

    async fn replace_document(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<usize> {
        for record in &records {
            check_record(tenant, Some(doc_id), record)?;
        }

        // Rolled back on drop if any statement fails.
        let mut tx = self.pool.begin().await.map_err(RagError::storage)?;

        let removed = sqlx::query("DELETE FROM chunk_vectors WHERE tenant_id = ? AND document_id = ?")
            .bind(tenant.as_str())
            .bind(doc_id)
            .execute(&mut *tx)
            .await
            .map_err(RagError::storage)?
            .rows_affected();

        for record in &records {
            let blob = vec_to_blob(&record.vector);
            insert_query(tenant, record, blob)
                .execute(&mut *tx)
                .await
                .map_err(RagError::storage)?;
        }

        tx.commit().await.map_err(RagError::storage)?;
        Ok(removed as usize)
    }

    async fn document_records(&self, tenant: &TenantId, doc_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let sql = format!(
            "{} WHERE tenant_id = ? AND document_id = ? ORDER BY chunk_index ASC",
            SELECT_VECTORS
        );
        let rows = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::storage)?;
        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>>>()?;
        if let Some(foreign) = records.iter().find(|r| &r.metadata.tenant != tenant) {
            return Err(RagError::TenantIsolationViolation {
                expected: tenant.to_string(),
                found: foreign.metadata.tenant.to_string(),
            });
        }
        Ok(records)
    }

    async fn search(&self, tenant: &TenantId, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let sql = format!("{} WHERE tenant_id = ?", SELECT_VECTORS);
        let rows = sqlx::query(&sql)
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::storage)?;

        let mut hits = rows
            .iter()
            .map(|row| row_to_hit(row, query))
            .collect::<Result<Vec<_>>>()?;

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        verify_hits(tenant, &hits)?;
        Ok(hits)
    }

    async fn remove(&self, tenant: &TenantId, doc_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunk_vectors WHERE tenant_id = ? AND document_id = ?")
            .bind(tenant.as_str())
            .bind(doc_id)
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, tenant: &TenantId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE tenant_id = ?")
            .bind(tenant.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::storage)?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{db, migrate};

    async fn open(tmp: &TempDir) -> SqliteVectorStore {
        let pool = db::connect(&tmp.path().join("vectors.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteVectorStore::new(pool)
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn record(tenant: &TenantId, doc: &str, index: usize, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk_id: format!("{}-{}-{}", tenant, doc, index),
            vector,
            metadata: ChunkMetadata {
                tenant: tenant.clone(),
                document_id: doc.to_string(),
                filename: format!("{}.txt", doc),
                chunk_index: index,
                text: format!("chunk {} of {}", index, doc),
                span: Span { start: index * 10, end: index * 10 + 10 },
                content_hash: format!("hash-{}", index),
            },
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let t = tenant("t1");
        store.add(&t, record(&t, "a", 0, vec![1.0, 0.0])).await.unwrap();
        store.add(&t, record(&t, "b", 0, vec![0.6, 0.8])).await.unwrap();
        store.add(&t, record(&t, "c", 0, vec![0.0, 1.0])).await.unwrap();

        let hits = store.search(&t, &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.document_id, "a");
        assert_eq!(hits[1].metadata.document_id, "b");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].metadata.span, Span { start: 0, end: 10 });
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let a = tenant("a");
        let b = tenant("b");
        store.add(&a, record(&a, "faq", 0, vec![1.0, 0.0])).await.unwrap();

        assert!(store.search(&b, &[1.0, 0.0], 5).await.unwrap().is_empty());
        assert_eq!(store.count(&b).await.unwrap(), 0);
        assert_eq!(store.remove(&b, "faq").await.unwrap(), 0);
        assert_eq!(store.count(&a).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_foreign_record() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let a = tenant("a");
        let b = tenant("b");
        let err = store.add(&a, record(&b, "faq", 0, vec![1.0])).await.unwrap_err();
        assert!(matches!(err, RagError::TenantIsolationViolation { .. }));
    }

    #[tokio::test]
    async fn test_replace_document_leaves_no_orphans() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let t = tenant("t1");
        let three = (0..3).map(|i| record(&t, "faq", i, vec![1.0, i as f32])).collect();
        assert_eq!(store.replace_document(&t, "faq", three).await.unwrap(), 0);
        store.add(&t, record(&t, "other", 0, vec![0.0, 1.0])).await.unwrap();

        let one = vec![record(&t, "faq", 0, vec![1.0, 0.0])];
        assert_eq!(store.replace_document(&t, "faq", one).await.unwrap(), 3);
        assert_eq!(store.count(&t).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_replace_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let t = tenant("t1");
        store
            .replace_document(&t, "faq", vec![record(&t, "faq", 0, vec![1.0])])
            .await
            .unwrap();
        let mismatched = vec![record(&t, "faq", 1, vec![1.0]), record(&t, "manual", 0, vec![1.0])];
        assert!(store.replace_document(&t, "faq", mismatched).await.is_err());
        assert_eq!(store.count(&t).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_document_records_round_trip_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let t = tenant("t1");
        let records: Vec<_> = (0..3).rev().map(|i| record(&t, "faq", i, vec![0.25, i as f32])).collect();
        store.replace_document(&t, "faq", records).await.unwrap();
        store.add(&t, record(&t, "other", 0, vec![1.0, 0.0])).await.unwrap();

        let loaded = store.document_records(&t, "faq").await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0], record(&t, "faq", 0, vec![0.25, 0.0]));
        assert_eq!(loaded[2].metadata.content_hash, "hash-2");
        assert!(store.document_records(&tenant("t2"), "faq").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_pools() {
        let tmp = TempDir::new().unwrap();
        let t = tenant("t1");
        {
            let store = open(&tmp).await;
            store.add(&t, record(&t, "faq", 0, vec![0.5, 0.5])).await.unwrap();
        }
        let store = open(&tmp).await;
        let hits = store.search(&t, &[0.5, 0.5], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.filename, "faq.txt");
    }
}

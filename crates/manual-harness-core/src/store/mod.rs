//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the per-tenant embedding store behind the
//! retriever, with pluggable backends (in-memory here, SQLite in the app
//! crate). Every call takes the tenant explicitly; a backend must never
//! return a record owned by another tenant.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use tracing::error;

use crate::error::{RagError, Result};
use crate::models::{ChunkMetadata, EmbeddingRecord, TenantId};

/// A nearest-neighbour match with its citation metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    pub chunk_id: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Abstract vector backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorStore::add) | Insert or overwrite one chunk's vector |
/// | [`replace_document`](VectorStore::replace_document) | Atomically swap all vectors of a document |
/// | [`document_records`](VectorStore::document_records) | Every vector of one document, in chunk order |
/// | [`search`](VectorStore::search) | Top-`k` cosine search within one tenant |
/// | [`remove`](VectorStore::remove) | Delete all vectors of a document |
/// | [`count`](VectorStore::count) | Number of vectors held for a tenant |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, tenant: &TenantId, record: EmbeddingRecord) -> Result<()>;

    /// Remove every vector of `doc_id` and insert `records`, as one unit.
    /// On error nothing changes. Returns the number of vectors removed.
    async fn replace_document(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<usize>;

    /// Every record of `doc_id`, ordered by chunk index. Used to restore a
    /// previous version and to reuse vectors of unchanged chunks.
    async fn document_records(&self, tenant: &TenantId, doc_id: &str) -> Result<Vec<EmbeddingRecord>>;

    /// At most `k` hits in descending score order.
    async fn search(&self, tenant: &TenantId, query: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    /// Returns the number of vectors removed.
    async fn remove(&self, tenant: &TenantId, doc_id: &str) -> Result<usize>;

    async fn count(&self, tenant: &TenantId) -> Result<usize>;
}

/// Reject a record whose metadata does not belong to `tenant`/`doc_id`.
pub fn check_record(tenant: &TenantId, doc_id: Option<&str>, record: &EmbeddingRecord) -> Result<()> {
    if &record.metadata.tenant != tenant {
        return Err(RagError::TenantIsolationViolation {
            expected: tenant.to_string(),
            found: record.metadata.tenant.to_string(),
        });
    }
    if let Some(doc_id) = doc_id {
        if record.metadata.document_id != doc_id {
            return Err(RagError::invalid(format!(
                "record {} belongs to document '{}', not '{}'",
                record.chunk_id, record.metadata.document_id, doc_id
            )));
        }
    }
    if record.vector.is_empty() {
        return Err(RagError::invalid(format!("record {} has an empty vector", record.chunk_id)));
    }
    Ok(())
}

/// Fail closed if any hit carries another tenant's metadata.
pub fn verify_hits(tenant: &TenantId, hits: &[VectorHit]) -> Result<()> {
    if let Some(hit) = hits.iter().find(|h| &h.metadata.tenant != tenant) {
        error!(
            expected = %tenant,
            found = %hit.metadata.tenant,
            chunk_id = %hit.chunk_id,
            "Vector search returned a foreign tenant's chunk"
        );
        return Err(RagError::TenantIsolationViolation {
            expected: tenant.to_string(),
            found: hit.metadata.tenant.to_string(),
        });
    }
    Ok(())
}

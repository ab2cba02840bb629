//! In-memory [`VectorStore`] for tests and ephemeral deployments.
//!
//! One partition per tenant in a `DashMap`, each a `BTreeMap` of chunk id
//! to record behind `std::sync::RwLock`. Search is brute-force cosine
//! similarity over the tenant's partition only. A partition is dropped
//! once its last record is removed.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{check_record, verify_hits, VectorHit, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{EmbeddingRecord, TenantId};

#[derive(Debug, Default)]
struct Partition {
    records: BTreeMap<String, EmbeddingRecord>,
    /// Set when the partition has been evicted from the map; writers that
    /// still hold it must fetch a fresh one.
    retired: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    partitions: DashMap<TenantId, Arc<RwLock<Partition>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, tenant: &TenantId) -> Option<Arc<RwLock<Partition>>> {
        self.partitions.get(tenant).map(|p| Arc::clone(p.value()))
    }

    fn partition_or_create(&self, tenant: &TenantId) -> Arc<RwLock<Partition>> {
        let entry = self.partitions.entry(tenant.clone()).or_default();
        Arc::clone(entry.value())
    }

    /// Run `f` on the tenant's live partition, creating it if needed.
    fn write<T>(&self, tenant: &TenantId, f: impl FnOnce(&mut Partition) -> T) -> Result<T> {
        loop {
            let partition = self.partition_or_create(tenant);
            let mut part = partition.write().map_err(|_| poisoned(tenant))?;
            if part.retired {
                continue;
            }
            return Ok(f(&mut part));
        }
    }

    fn evict_if_empty(&self, tenant: &TenantId) {
        self.partitions.remove_if(tenant, |_, partition| match partition.write() {
            Ok(mut part) if part.records.is_empty() => {
                part.retired = true;
                true
            }
            _ => false,
        });
    }

    /// Number of tenants currently holding a partition.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

fn poisoned(tenant: &TenantId) -> RagError {
    RagError::Storage(format!("vector partition for '{}' is poisoned", tenant))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, tenant: &TenantId, record: EmbeddingRecord) -> Result<()> {
        check_record(tenant, None, &record)?;
        self.write(tenant, |part| {
            part.records.insert(record.chunk_id.clone(), record);
        })
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
        let (removed, empty) = self.write(tenant, |part| {
            let removed = remove_document(part, doc_id);
            for record in records {
                part.records.insert(record.chunk_id.clone(), record);
            }
            (removed, part.records.is_empty())
        })?;
        if empty {
            self.evict_if_empty(tenant);
        }
        Ok(removed)
    }

    async fn document_records(&self, tenant: &TenantId, doc_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let Some(partition) = self.partition(tenant) else {
            return Ok(Vec::new());
        };
        let part = partition.read().map_err(|_| poisoned(tenant))?;
        let mut records: Vec<EmbeddingRecord> = part
            .records
            .values()
            .filter(|r| r.metadata.document_id == doc_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.metadata.chunk_index);
        Ok(records)
    }

    async fn search(&self, tenant: &TenantId, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let Some(partition) = self.partition(tenant) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<VectorHit> = {
            let part = partition.read().map_err(|_| poisoned(tenant))?;
            part.records
                .values()
                .map(|r| VectorHit {
                    chunk_id: r.chunk_id.clone(),
                    score: cosine_similarity(query, &r.vector),
                    metadata: r.metadata.clone(),
                })
                .collect()
        };
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
        let Some(partition) = self.partition(tenant) else {
            return Ok(0);
        };
        let (removed, empty) = {
            let mut part = partition.write().map_err(|_| poisoned(tenant))?;
            let removed = remove_document(&mut part, doc_id);
            (removed, part.records.is_empty())
        };
        if empty {
            self.evict_if_empty(tenant);
        }
        Ok(removed)
    }

    async fn count(&self, tenant: &TenantId) -> Result<usize> {
        let Some(partition) = self.partition(tenant) else {
            return Ok(0);
        };
        let part = partition.read().map_err(|_| poisoned(tenant))?;
        Ok(part.records.len())
    }
}

fn remove_document(part: &mut Partition, doc_id: &str) -> usize {
    let before = part.records.len();
    part.records.retain(|_, r| r.metadata.document_id != doc_id);
    before - part.records.len()
}

//! The caller-facing facade.
//!
//! [`RagService`] is constructed once with explicit dependencies and then
//! shared by reference. It owns the lexical index, the retriever, the
//! answerer and the usage ledger, and coordinates them for ingestion,
//! deletion and querying.
//!
//! # Ingestion
//!
//! ```text
//! validate → lock tenant → chunk → consume quota (documents, storage_bytes)
//!          → embed all chunks → commit vectors → commit record → commit lexical
//! ```
//!
//! Everything that can fail on an external service happens before the
//! first commit, so an embedding failure leaves the previous version of
//! the document untouched. It is recorded as a pending ingestion for
//! [`RagService::retry_pending`]. Chunks whose content hash matches a
//! stored vector of the previous version are not sent to the embedder
//! again.
//!
//! A failure between commits restores the previous version (record,
//! vectors and postings) when there was one, and removes the document
//! otherwise. Consumed quota is released on every failure path.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::answer::{AnswerParams, GroundedAnswerer};
use crate::chunk::{chunk_document, ChunkParams};
use crate::embedding::{embed_batched, Embedder};
use crate::error::{EmbeddingFailure, RagError, Result};
use crate::generation::Generator;
use crate::kv::{doc_key, doc_prefix, pending_key, pending_prefix, KvStore};
use crate::language::Language;
use crate::lexical::{LexicalIndex, DEFAULT_EXCERPT_CHARS};
use crate::models::{
    validate_document_id, Answer, Chunk, ChunkMetadata, ContextItem, Document, DocumentInfo,
    EmbeddingRecord, IngestReport, NewDocument, PendingIngestion, TenantId,
};
use crate::retrieve::{RetrievalParams, Retriever};
use crate::store::VectorStore;
use crate::usage::{Clock, Consumption, CounterType, PlanCatalog, UsageLedger, UsageSnapshot};

/// Collaborators injected into [`RagService::new`].
pub struct ServiceParts {
    pub kv: Arc<dyn KvStore>,
    pub vectors: Arc<dyn VectorStore>,
    /// `None` runs in lexical-only mode.
    pub embedder: Option<Arc<dyn Embedder>>,
    pub generator: Arc<dyn Generator>,
    pub clock: Arc<dyn Clock>,
    pub plans: PlanCatalog,
}

/// Tunables for [`RagService`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub chunking: ChunkParams,
    pub retrieval: RetrievalParams,
    pub answer: AnswerParams,
    pub embed_batch_size: usize,
    pub excerpt_chars: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkParams::default(),
            retrieval: RetrievalParams::default(),
            answer: AnswerParams::default(),
            embed_batch_size: 64,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }
}

pub struct RagService {
    kv: Arc<dyn KvStore>,
    vectors: Arc<dyn VectorStore>,
    lexical: Arc<LexicalIndex>,
    embedder: Option<Arc<dyn Embedder>>,
    retriever: Arc<Retriever>,
    answerer: GroundedAnswerer,
    ledger: UsageLedger,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    tenant_locks: DashMap<TenantId, Arc<Mutex<()>>>,
}

/// Per-document outcome of a batch operation.
pub type BatchOutcome = Vec<(String, Result<IngestReport>)>;

impl RagService {
    pub fn new(parts: ServiceParts, config: ServiceConfig) -> Result<Self> {
        config.chunking.validate()?;
        let lexical = Arc::new(LexicalIndex::new(config.excerpt_chars));
        let retriever = Arc::new(Retriever::new(
            Arc::clone(&parts.vectors),
            Arc::clone(&lexical),
            parts.embedder.clone(),
            config.retrieval.clone(),
        ));
        let answerer = GroundedAnswerer::new(Arc::clone(&retriever), parts.generator, config.answer.clone());
        let ledger = UsageLedger::new(Arc::clone(&parts.kv), Arc::clone(&parts.clock), parts.plans);
        Ok(Self {
            kv: parts.kv,
            vectors: parts.vectors,
            lexical,
            embedder: parts.embedder,
            retriever,
            answerer,
            ledger,
            clock: parts.clock,
            config,
            tenant_locks: DashMap::new(),
        })
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn lexical_index(&self) -> &LexicalIndex {
        &self.lexical
    }

    fn tenant_lock(&self, tenant: &TenantId) -> Arc<Mutex<()>> {
        let entry = self.tenant_locks.entry(tenant.clone()).or_default();
        Arc::clone(entry.value())
    }

    /// Drop the tenant's lock once nobody holds or waits on it.
    fn release_tenant_lock(&self, tenant: &TenantId) {
        self.tenant_locks
            .remove_if(tenant, |_, lock| Arc::strong_count(lock) == 1);
    }

    // ============ Ingestion ============

    /// Ingest (or re-ingest) one document.
    pub async fn ingest_document(&self, tenant: &TenantId, doc: NewDocument) -> Result<IngestReport> {
        validate_document_id(&doc.id)?;
        if doc.text.trim().is_empty() {
            return Err(RagError::Extraction(format!(
                "document '{}' contains no text",
                doc.filename
            )));
        }

        let lock = self.tenant_lock(tenant);
        let result = {
            let _guard = lock.lock().await;
            self.ingest_locked(tenant, doc).await
        };
        drop(lock);
        self.release_tenant_lock(tenant);
        result
    }

    async fn ingest_locked(&self, tenant: &TenantId, doc: NewDocument) -> Result<IngestReport> {
        let chunks = chunk_document(tenant, &doc.id, &doc.text, &self.config.chunking)?;
        let limits = self.ledger.limits_for(tenant).await?;
        let documents = self
            .ledger
            .try_consume(tenant, &limits, CounterType::Documents, 1)
            .await?;
        let storage = match self
            .ledger
            .try_consume(tenant, &limits, CounterType::StorageBytes, doc.text.len() as u64)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                self.release(tenant, &[documents]).await;
                return Err(e);
            }
        };

        match self.index_document(tenant, &doc, chunks).await {
            Ok(report) => {
                info!(
                    tenant = %tenant,
                    document = %doc.id,
                    chunks = report.chunk_count,
                    replaced = report.replaced,
                    embedded = report.embedded,
                    "Ingested document"
                );
                Ok(report)
            }
            Err(RagError::EmbeddingService { failure, .. }) => {
                self.release(tenant, &[documents, storage]).await;
                let retry_queued = self.queue_pending(tenant, &doc, &failure.to_string()).await;
                warn!(
                    tenant = %tenant,
                    document = %doc.id,
                    error = %failure,
                    retry_queued,
                    "Embedding failed during ingestion"
                );
                Err(RagError::EmbeddingService {
                    failure,
                    retry_queued,
                })
            }
            Err(e) => {
                self.release(tenant, &[documents, storage]).await;
                warn!(tenant = %tenant, document = %doc.id, error = %e, "Ingestion failed");
                Err(e)
            }
        }
    }

    async fn release(&self, tenant: &TenantId, consumptions: &[Consumption]) {
        for c in consumptions {
            if let Err(e) = self.ledger.release(tenant, c).await {
                error!(tenant = %tenant, counter = %c.counter, error = %e, "Failed to release quota");
            }
        }
    }

    async fn queue_pending(&self, tenant: &TenantId, doc: &NewDocument, error_msg: &str) -> bool {
        let pending = PendingIngestion {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            text: doc.text.clone(),
            failed_at: self.clock.now().timestamp(),
            error: error_msg.to_string(),
        };
        let json = match serde_json::to_string(&pending) {
            Ok(j) => j,
            Err(e) => {
                error!(tenant = %tenant, error = %e, "Failed to encode pending ingestion");
                return false;
            }
        };
        match self.kv.set(&pending_key(tenant, &doc.id), &json).await {
            Ok(()) => true,
            Err(e) => {
                error!(tenant = %tenant, error = %e, "Failed to persist pending ingestion");
                false
            }
        }
    }

    async fn index_document(&self, tenant: &TenantId, doc: &NewDocument, chunks: Vec<Chunk>) -> Result<IngestReport> {
        let key = doc_key(tenant, &doc.id);
        let previous = self.kv.get(&key).await?;
        let replaced = previous.is_some();
        let previous_vectors = if replaced {
            self.vectors.document_records(tenant, &doc.id).await?
        } else {
            Vec::new()
        };

        let records = match &self.embedder {
            Some(embedder) => Some(
                self.embed_chunks(embedder.as_ref(), tenant, doc, &chunks, &previous_vectors)
                    .await?,
            ),
            None => None,
        };
        let embedded = records.is_some();

        let record = Document {
            id: doc.id.clone(),
            tenant: tenant.clone(),
            filename: doc.filename.clone(),
            text: doc.text.clone(),
            ingested_at: self.clock.now().timestamp(),
            byte_size: doc.text.len() as u64,
            chunk_count: chunks.len(),
        };
        let json = serde_json::to_string(&record).map_err(RagError::storage)?;

        // Atomic per document; on error the previous vectors are intact.
        match records {
            Some(records) => {
                self.vectors.replace_document(tenant, &doc.id, records).await?;
            }
            None => {
                self.vectors.remove(tenant, &doc.id).await?;
            }
        }

        if let Err(e) = self.kv.set(&key, &json).await {
            error!(tenant = %tenant, document = %doc.id, error = %e, "Record commit failed, rolling back");
            self.roll_back(tenant, &doc.id, previous.as_deref(), previous_vectors, false)
                .await;
            return Err(e);
        }
        if let Err(e) = self
            .lexical
            .add_labeled(tenant, &doc.id, &doc.filename, &doc.text)
        {
            error!(tenant = %tenant, document = %doc.id, error = %e, "Lexical commit failed, rolling back");
            self.roll_back(tenant, &doc.id, previous.as_deref(), previous_vectors, true)
                .await;
            return Err(e);
        }

        if let Err(e) = self.kv.delete(&pending_key(tenant, &doc.id)).await {
            warn!(tenant = %tenant, document = %doc.id, error = %e, "Failed to clear pending entry");
        }

        Ok(IngestReport {
            document_id: doc.id.clone(),
            chunk_count: chunks.len(),
            replaced,
            embedded,
        })
    }

    /// Embed `chunks`, reusing vectors of the previous version whose
    /// content hash is unchanged.
    async fn embed_chunks(
        &self,
        embedder: &dyn Embedder,
        tenant: &TenantId,
        doc: &NewDocument,
        chunks: &[Chunk],
        previous: &[EmbeddingRecord],
    ) -> Result<Vec<EmbeddingRecord>> {
        let reusable: HashMap<&str, &[f32]> = previous
            .iter()
            .filter(|r| !r.metadata.content_hash.is_empty() && r.vector.len() == embedder.dims())
            .map(|r| (r.metadata.content_hash.as_str(), r.vector.as_slice()))
            .collect();

        let missing: Vec<String> = chunks
            .iter()
            .filter(|c| !reusable.contains_key(c.content_hash.as_str()))
            .map(|c| c.text.clone())
            .collect();
        let fresh = if missing.is_empty() {
            Vec::new()
        } else {
            embed_batched(
                embedder,
                &missing,
                self.config.embed_batch_size,
                self.config.retrieval.embed_timeout,
            )
            .await?
        };
        debug!(
            tenant = %tenant,
            document = %doc.id,
            embedded = fresh.len(),
            reused = chunks.len() - missing.len(),
            "Embedded chunks"
        );

        let mut fresh = fresh.into_iter();
        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = match reusable.get(chunk.content_hash.as_str()) {
                Some(v) => v.to_vec(),
                None => fresh.next().ok_or_else(|| {
                    RagError::embedding(EmbeddingFailure::Malformed(
                        "fewer vectors than chunks".to_string(),
                    ))
                })?,
            };
            records.push(EmbeddingRecord {
                chunk_id: chunk.id.clone(),
                vector,
                metadata: ChunkMetadata {
                    tenant: tenant.clone(),
                    document_id: doc.id.clone(),
                    filename: doc.filename.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    span: chunk.span,
                    content_hash: chunk.content_hash.clone(),
                },
            });
        }
        Ok(records)
    }

    /// Undo a partial commit. With a previous version, its vectors, record
    /// (when already overwritten) and postings are put back; otherwise the
    /// document is purged.
    async fn roll_back(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        previous: Option<&str>,
        previous_vectors: Vec<EmbeddingRecord>,
        record_written: bool,
    ) {
        let Some(json) = previous else {
            self.purge(tenant, doc_id).await;
            return;
        };

        let restored = if previous_vectors.is_empty() {
            self.vectors.remove(tenant, doc_id).await
        } else {
            self.vectors.replace_document(tenant, doc_id, previous_vectors).await
        };
        if let Err(e) = restored {
            error!(tenant = %tenant, document = doc_id, error = %e, "Failed to restore vectors");
        }
        if !record_written {
            return;
        }

        let key = doc_key(tenant, doc_id);
        if let Err(e) = self.kv.set(&key, json).await {
            error!(tenant = %tenant, document = doc_id, error = %e, "Failed to restore record");
        }
        match decode_document(tenant, &key, json) {
            Ok(prev) => {
                if let Err(e) = self.lexical.add_labeled(tenant, doc_id, &prev.filename, &prev.text) {
                    error!(tenant = %tenant, document = doc_id, error = %e, "Failed to restore postings");
                }
            }
            Err(e) => error!(tenant = %tenant, document = doc_id, error = %e, "Failed to decode previous record"),
        }
    }

    /// Best-effort removal of every trace of a document.
    async fn purge(&self, tenant: &TenantId, doc_id: &str) -> bool {
        let mut existed = false;
        match self.vectors.remove(tenant, doc_id).await {
            Ok(n) => existed |= n > 0,
            Err(e) => error!(tenant = %tenant, document = doc_id, error = %e, "Failed to remove vectors"),
        }
        match self.lexical.remove_document(tenant, doc_id) {
            Ok(found) => existed |= found,
            Err(e) => error!(tenant = %tenant, document = doc_id, error = %e, "Failed to remove postings"),
        }
        for key in [doc_key(tenant, doc_id), pending_key(tenant, doc_id)] {
            match self.kv.delete(&key).await {
                Ok(found) => existed |= found,
                Err(e) => error!(tenant = %tenant, key = %key, error = %e, "Failed to delete record"),
            }
        }
        existed
    }

    /// Ingest several documents, one outcome per document.
    pub async fn ingest_batch(&self, tenant: &TenantId, docs: Vec<NewDocument>) -> BatchOutcome {
        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.id.clone();
            let result = self.ingest_document(tenant, doc).await;
            outcomes.push((id, result));
        }
        outcomes
    }

    /// Pending ingestions for `tenant`.
    pub async fn list_pending(&self, tenant: &TenantId) -> Result<Vec<PendingIngestion>> {
        self.kv
            .scan_prefix(&pending_prefix(tenant))
            .await?
            .into_iter()
            .map(|(key, json)| {
                serde_json::from_str(&json)
                    .map_err(|e| RagError::Storage(format!("corrupt pending record '{}': {}", key, e)))
            })
            .collect()
    }

    /// Re-run every pending ingestion for `tenant`.
    pub async fn retry_pending(&self, tenant: &TenantId) -> Result<BatchOutcome> {
        let pending = self.list_pending(tenant).await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!(tenant = %tenant, count = pending.len(), "Retrying pending ingestions");
        let docs = pending.into_iter().map(NewDocument::from).collect();
        Ok(self.ingest_batch(tenant, docs).await)
    }

    /// Delete a document and everything derived from it. Returns whether
    /// anything existed.
    pub async fn delete_document(&self, tenant: &TenantId, doc_id: &str) -> Result<bool> {
        validate_document_id(doc_id)?;
        let lock = self.tenant_lock(tenant);
        let result = {
            let _guard = lock.lock().await;
            self.delete_locked(tenant, doc_id).await
        };
        drop(lock);
        self.release_tenant_lock(tenant);
        result
    }

    async fn delete_locked(&self, tenant: &TenantId, doc_id: &str) -> Result<bool> {
        let removed_vectors = self.vectors.remove(tenant, doc_id).await?;
        let removed_postings = self.lexical.remove_document(tenant, doc_id)?;
        let removed_pending = self.kv.delete(&pending_key(tenant, doc_id)).await?;
        let removed_record = self.kv.delete(&doc_key(tenant, doc_id)).await?;

        let existed = removed_vectors > 0 || removed_postings || removed_pending || removed_record;
        info!(tenant = %tenant, document = doc_id, existed, vectors = removed_vectors, "Deleted document");
        Ok(existed)
    }

    // ============ Querying ============

    /// Answer a question for `tenant`, consuming one `queries` unit.
    ///
    /// Errors are limited to quota exhaustion, invalid input and tenant
    /// isolation violations; every other failure becomes a degraded answer.
    pub async fn query(&self, tenant: &TenantId, question: &str, language: Option<Language>) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::invalid("question must not be empty"));
        }
        let limits = self.ledger.limits_for(tenant).await?;
        let consumption = self
            .ledger
            .try_consume(tenant, &limits, CounterType::Queries, 1)
            .await?;

        match self.answerer.answer(tenant, question, language).await {
            Ok(answer) => Ok(answer),
            Err(e @ (RagError::InvalidInput(_) | RagError::TenantIsolationViolation { .. })) => {
                self.release(tenant, &[consumption]).await;
                Err(e)
            }
            Err(e) => {
                let language = language.unwrap_or_else(|| Language::detect(question));
                warn!(tenant = %tenant, error = %e, "Query failed, returning fallback");
                Ok(Answer {
                    text: language.system_error().to_string(),
                    sources: Vec::new(),
                    refused: false,
                    degraded: true,
                    escalated: false,
                    language,
                })
            }
        }
    }

    /// Retrieval without generation or metering.
    pub async fn search(&self, tenant: &TenantId, query: &str, limit: usize) -> Result<Vec<ContextItem>> {
        self.retriever.retrieve(tenant, query, limit).await
    }

    // ============ Accounts ============

    pub async fn get_usage(&self, tenant: &TenantId) -> Result<UsageSnapshot> {
        self.ledger.snapshot(tenant).await
    }

    pub async fn set_plan(&self, tenant: &TenantId, plan: &str) -> Result<()> {
        self.ledger.set_plan(tenant, plan).await?;
        info!(tenant = %tenant, plan, "Plan assigned");
        Ok(())
    }

    pub async fn get_document(&self, tenant: &TenantId, doc_id: &str) -> Result<Option<Document>> {
        let key = doc_key(tenant, doc_id);
        match self.kv.get(&key).await? {
            Some(json) => Ok(Some(decode_document(tenant, &key, &json)?)),
            None => Ok(None),
        }
    }

    pub async fn list_documents(&self, tenant: &TenantId) -> Result<Vec<DocumentInfo>> {
        let mut docs = Vec::new();
        for (key, json) in self.kv.scan_prefix(&doc_prefix(tenant)).await? {
            let doc = decode_document(tenant, &key, &json)?;
            docs.push(DocumentInfo::from(&doc));
        }
        Ok(docs)
    }

    /// Rebuild the in-memory lexical index from persisted document
    /// records. Returns the number of documents indexed.
    pub async fn rebuild_lexical_index(&self) -> Result<usize> {
        self.lexical.clear();
        let mut count = 0;
        for (key, json) in self.kv.scan_prefix("doc/").await? {
            let doc: Document = serde_json::from_str(&json)
                .map_err(|e| RagError::Storage(format!("corrupt document record '{}': {}", key, e)))?;
            if key != doc_key(&doc.tenant, &doc.id) {
                return Err(RagError::TenantIsolationViolation {
                    expected: key,
                    found: doc.tenant.to_string(),
                });
            }
            self.lexical
                .add_labeled(&doc.tenant, &doc.id, &doc.filename, &doc.text)?;
            count += 1;
        }
        info!(documents = count, "Rebuilt lexical index");
        Ok(count)
    }
}

fn decode_document(tenant: &TenantId, key: &str, json: &str) -> Result<Document> {
    let doc: Document = serde_json::from_str(json)
        .map_err(|e| RagError::Storage(format!("corrupt document record '{}': {}", key, e)))?;
    if &doc.tenant != tenant {
        error!(expected = %tenant, found = %doc.tenant, key, "Document record owned by another tenant");
        return Err(RagError::TenantIsolationViolation {
            expected: tenant.to_string(),
            found: doc.tenant.to_string(),
        });
    }
    Ok(doc)
}

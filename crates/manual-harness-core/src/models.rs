//! Core data models shared by the indexes, the retriever, and the service.
//!
//! Every record that can be stored carries its owning [`TenantId`]. Types
//! that only live for the duration of one request ([`ContextItem`],
//! [`Answer`]) are plain values with no storage identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

const MAX_TENANT_ID_LEN: usize = 128;

/// Validated tenant identifier.
///
/// Tenant ids become part of storage keys (`doc/{tenant}/...`), so they
/// must not contain `/`, whitespace, or control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(RagError::invalid("tenant id must not be empty"));
        }
        if id.chars().count() > MAX_TENANT_ID_LEN {
            return Err(RagError::invalid(format!(
                "tenant id longer than {} characters",
                MAX_TENANT_ID_LEN
            )));
        }
        if id
            .chars()
            .any(|c| c == '/' || c.is_whitespace() || c.is_control())
        {
            return Err(RagError::invalid(format!(
                "tenant id '{}' contains '/', whitespace, or control characters",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self> {
        TenantId::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Validate a document id supplied by the caller.
///
/// Same character rules as tenant ids: document ids are embedded in keys.
pub fn validate_document_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(RagError::invalid("document id must not be empty"));
    }
    if id
        .chars()
        .any(|c| c == '/' || c.is_whitespace() || c.is_control())
    {
        return Err(RagError::invalid(format!(
            "document id '{}' contains '/', whitespace, or control characters",
            id
        )));
    }
    Ok(())
}

/// A document as handed to the service for ingestion.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub filename: String,
    /// Plain text produced by the extraction collaborator.
    pub text: String,
}

/// Persisted document record (`doc/{tenant}/{id}` in the key-value store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub tenant: TenantId,
    pub filename: String,
    pub text: String,
    /// Unix seconds.
    pub ingested_at: i64,
    pub byte_size: u64,
    pub chunk_count: usize,
}

/// A document whose ingestion failed on the embedding service, kept at
/// `pending/{tenant}/{id}` until a retry succeeds or it is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingIngestion {
    pub id: String,
    pub filename: String,
    pub text: String,
    /// Unix seconds of the last failed attempt.
    pub failed_at: i64,
    pub error: String,
}

impl From<PendingIngestion> for NewDocument {
    fn from(p: PendingIngestion) -> Self {
        Self {
            id: p.id,
            filename: p.filename,
            text: p.text,
        }
    }
}

/// Listing view of a [`Document`] without its body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub filename: String,
    pub ingested_at: i64,
    pub byte_size: u64,
    pub chunk_count: usize,
}

impl From<&Document> for DocumentInfo {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            ingested_at: doc.ingested_at,
            byte_size: doc.byte_size,
            chunk_count: doc.chunk_count,
        }
    }
}

/// Character span `[start, end)` of a chunk within its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A contiguous segment of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub tenant: TenantId,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub span: Span,
    /// SHA-256 of `text`, hex encoded.
    pub content_hash: String,
}

/// Citation metadata stored next to every embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub tenant: TenantId,
    pub document_id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub text: String,
    pub span: Span,
    /// Hash of `text`; an unchanged chunk keeps its vector on re-ingest.
    #[serde(default)]
    pub content_hash: String,
}

/// The vector of exactly one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Which index produced a [`ContextItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Vector,
    Lexical,
}

/// One piece of retrieved context handed to the answerer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextItem {
    pub document_id: String,
    pub filename: String,
    /// `None` for lexical hits, which are document-level.
    pub chunk_index: Option<usize>,
    pub text: String,
    pub score: f64,
    pub origin: Origin,
}

/// Provenance entry attached to an [`Answer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl From<&ContextItem> for SourceRef {
    fn from(item: &ContextItem) -> Self {
        Self {
            document_id: item.document_id.clone(),
            filename: item.filename.clone(),
            chunk_index: item.chunk_index,
        }
    }
}

/// Result of a grounded query. `text` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub refused: bool,
    /// Set when the text is a fallback message rather than a generated answer.
    pub degraded: bool,
    /// Set when the question was routed to a human instead of answered.
    pub escalated: bool,
    pub language: crate::language::Language,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_count: usize,
    /// True when an earlier version of the document was replaced.
    pub replaced: bool,
    pub embedded: bool,
}

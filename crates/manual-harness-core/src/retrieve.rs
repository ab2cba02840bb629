//! Query-time retrieval: vector search first, lexical search as fallback.
//!
//! # Pipeline
//!
//! 1. Embed the query under a timeout and search the tenant's vectors for
//!    `candidate_k` candidates, dropping hits below `min_vector_score`.
//! 2. If that yields nothing (no embedder, no vectors, embedding failure,
//!    or every hit below threshold), search the lexical index instead.
//!    With `lexical_supplement`, lexical hits also fill slots the vector
//!    path left empty.
//! 3. Keep at most `max_chunks_per_doc` items per document, drop items
//!    whose whitespace-normalized text was already seen, truncate to
//!    `top_k`.
//!
//! An empty result is a valid outcome meaning "nothing relevant". The
//! only error that escapes the vector path is a tenant isolation
//! violation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::embedding::{embed_query, Embedder};
use crate::error::{RagError, Result};
use crate::lexical::LexicalIndex;
use crate::models::{ContextItem, Origin, TenantId};
use crate::store::VectorStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub candidate_k: usize,
    pub min_vector_score: f32,
    pub max_chunks_per_doc: usize,
    pub lexical_supplement: bool,
    pub embed_timeout: Duration,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            candidate_k: 20,
            min_vector_score: 0.2,
            max_chunks_per_doc: 1,
            lexical_supplement: false,
            embed_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Retriever {
    vectors: Arc<dyn VectorStore>,
    lexical: Arc<LexicalIndex>,
    embedder: Option<Arc<dyn Embedder>>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        lexical: Arc<LexicalIndex>,
        embedder: Option<Arc<dyn Embedder>>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            vectors,
            lexical,
            embedder,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Whether `tenant` has anything indexed at all.
    pub async fn has_content(&self, tenant: &TenantId) -> bool {
        if self.lexical.document_count(tenant) > 0 {
            return true;
        }
        matches!(self.vectors.count(tenant).await, Ok(n) if n > 0)
    }

    /// Ranked context for `query` within `tenant`, at most `top_k` items.
    pub async fn retrieve(&self, tenant: &TenantId, query: &str, top_k: usize) -> Result<Vec<ContextItem>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let vector_items = self.vector_candidates(tenant, query).await?;
        let mut items = dedupe(vector_items, self.params.max_chunks_per_doc);

        if items.is_empty() {
            items = dedupe(self.lexical_candidates(tenant, query, top_k)?, self.params.max_chunks_per_doc);
            if !items.is_empty() {
                warn!(tenant = %tenant, hits = items.len(), "Answering from lexical fallback");
            }
        } else if self.params.lexical_supplement && items.len() < top_k {
            let mut combined = items;
            combined.extend(self.lexical_candidates(tenant, query, top_k)?);
            items = dedupe(combined, self.params.max_chunks_per_doc);
        }

        items.truncate(top_k);
        debug!(
            tenant = %tenant,
            scores = ?items.iter().map(|i| i.score).collect::<Vec<_>>(),
            "Retrieved context"
        );
        Ok(items)
    }

    async fn vector_candidates(&self, tenant: &TenantId, query: &str) -> Result<Vec<ContextItem>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        match self.vectors.count(tenant).await {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Vector count failed, skipping vector search");
                return Ok(Vec::new());
            }
        }

        let query_vec = match embed_query(embedder.as_ref(), query, self.params.embed_timeout).await {
            Ok(v) => v,
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Query embedding failed, using lexical search");
                return Ok(Vec::new());
            }
        };

        let hits = match self.vectors.search(tenant, &query_vec, self.params.candidate_k).await {
            Ok(hits) => hits,
            Err(e @ RagError::TenantIsolationViolation { .. }) => return Err(e),
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Vector search failed, using lexical search");
                return Ok(Vec::new());
            }
        };

        Ok(hits
            .into_iter()
            .filter(|h| h.score >= self.params.min_vector_score)
            .map(|h| ContextItem {
                document_id: h.metadata.document_id,
                filename: h.metadata.filename,
                chunk_index: Some(h.metadata.chunk_index),
                text: h.metadata.text,
                score: h.score as f64,
                origin: Origin::Vector,
            })
            .collect())
    }

    fn lexical_candidates(&self, tenant: &TenantId, query: &str, limit: usize) -> Result<Vec<ContextItem>> {
        Ok(self
            .lexical
            .search(tenant, query, limit)?
            .into_iter()
            .map(|h| ContextItem {
                document_id: h.document_id,
                filename: h.label,
                chunk_index: None,
                text: h.excerpt,
                score: h.score,
                origin: Origin::Lexical,
            })
            .collect())
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep input order; cap items per document and drop repeated text.
fn dedupe(items: Vec<ContextItem>, max_per_doc: usize) -> Vec<ContextItem> {
    let max_per_doc = max_per_doc.max(1);
    let mut per_doc: HashMap<String, usize> = HashMap::new();
    let mut seen_text: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let count = per_doc.entry(item.document_id.clone()).or_insert(0);
        if *count >= max_per_doc {
            continue;
        }
        if !seen_text.insert(normalize(&item.text)) {
            continue;
        }
        *count += 1;
        out.push(item);
    }
    out
}

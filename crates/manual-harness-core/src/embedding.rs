//! Embedding backend trait and vector utilities.
//!
//! Defines the [`Embedder`] trait implemented by all embedding backends,
//! plus pure helpers for vector serialization and similarity.
//!
//! Concrete backends (OpenAI, Ollama) live in the `manual-harness` app
//! crate. Tests use scripted embedders that implement the same trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EmbeddingFailure, RagError, Result};

/// An embedding backend.
///
/// Implementations return exactly one vector of [`dims`](Embedder::dims)
/// floats per input text, in input order, and classify failures as
/// [`RagError::EmbeddingService`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of `batch_size`, each batch bounded by `timeout`.
///
/// Validates that the backend returned one vector of the advertised
/// dimension per input.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = tokio::time::timeout(timeout, embedder.embed(batch))
            .await
            .map_err(|_| RagError::embedding(EmbeddingFailure::Timeout))??;
        if vectors.len() != batch.len() {
            return Err(RagError::embedding(EmbeddingFailure::Malformed(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            ))));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dims()) {
            return Err(RagError::embedding(EmbeddingFailure::Malformed(format!(
                "expected {} dimensions, got {}",
                embedder.dims(),
                bad.len()
            ))));
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query under `timeout`.
pub async fn embed_query(embedder: &dyn Embedder, query: &str, timeout: Duration) -> Result<Vec<f32>> {
    let mut vectors = embed_batched(embedder, &[query.to_string()], 1, timeout).await?;
    vectors
        .pop()
        .ok_or_else(|| RagError::embedding(EmbeddingFailure::Malformed("no vector returned".into())))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use manual_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

//! Boundary-aware text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters.
//! Each cut is placed on the strongest boundary found in the back half of
//! the window, in this order of preference:
//!
//! 1. paragraph break (`\n\n`)
//! 2. line break (`\n`)
//! 3. sentence end (`。`, `！`, `？`, or `.`/`!`/`?` followed by whitespace)
//! 4. clause break (`、`, `，`, or `,` followed by whitespace)
//! 5. space
//!
//! and falls back to a hard cut at `chunk_size` when the window has none.
//! The last `overlap` characters of a chunk are repeated at the start of
//! the next one so that sentences straddling a cut stay retrievable.
//!
//! Lengths and spans are counted in `char`s, never bytes, so multi-byte
//! text (Japanese manuals are the common case) is never split inside a
//! code point.
//!
//! # Example
//!
//! ```rust
//! use manual_harness_core::chunk::split;
//!
//! let segments = split("First paragraph.\n\nSecond paragraph.", 500, 50).unwrap();
//! assert_eq!(segments.len(), 1);
//! assert_eq!(segments[0].span.start, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::models::{Chunk, Span, TenantId};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 50;

/// Chunking parameters, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkParams {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 2 {
            return Err(RagError::invalid("chunk_size must be >= 2"));
        }
        if self.overlap >= self.chunk_size {
            return Err(RagError::invalid(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A chunk of text and where it came from, before identity is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub span: Span,
}

/// Split `text` into overlapping segments.
///
/// Returns no segments for empty or whitespace-only input. The output is
/// a pure function of the arguments.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Segment>> {
    ChunkParams {
        chunk_size,
        overlap,
    }
    .validate()?;

    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut segments = Vec::new();

    let mut pos = skip_whitespace(&chars, 0, n);
    while pos < n {
        let window_end = (pos + chunk_size).min(n);
        let end = if window_end == n {
            n
        } else {
            find_cut(&chars, pos, window_end, chunk_size / 2)
        };

        let start = skip_whitespace(&chars, pos, end);
        let mut stop = end;
        while stop > start && chars[stop - 1].is_whitespace() {
            stop -= 1;
        }
        if stop > start {
            segments.push(Segment {
                text: chars[start..stop].iter().collect(),
                span: Span { start, end: stop },
            });
        }

        if end >= n {
            break;
        }
        let next = end.saturating_sub(overlap).max(pos + 1);
        pos = skip_whitespace(&chars, next, n);
    }

    Ok(segments)
}

/// Split a document and stamp every segment with tenant/document identity.
///
/// Chunk ids are UUIDv5 values over `(tenant, document, index)`, so
/// re-ingesting identical text reproduces identical ids.
pub fn chunk_document(
    tenant: &TenantId,
    document_id: &str,
    text: &str,
    params: &ChunkParams,
) -> Result<Vec<Chunk>> {
    let segments = split(text, params.chunk_size, params.overlap)?;
    Ok(segments
        .into_iter()
        .enumerate()
        .map(|(index, seg)| make_chunk(tenant, document_id, index, seg))
        .collect())
}

/// Deterministic chunk id.
pub fn chunk_id(tenant: &TenantId, document_id: &str, index: usize) -> String {
    let name = format!("{}/{}/{}", tenant, document_id, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

fn make_chunk(tenant: &TenantId, document_id: &str, index: usize, seg: Segment) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(seg.text.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(tenant, document_id, index),
        tenant: tenant.clone(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: seg.text,
        span: seg.span,
        content_hash,
    }
}

fn skip_whitespace(chars: &[char], mut i: usize, limit: usize) -> usize {
    while i < limit && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Pick the cut position for the window `[pos, window_end)`.
///
/// Only boundaries at or after `pos + min_len` are considered so that a
/// boundary near the window start cannot produce a sliver chunk.
fn find_cut(chars: &[char], pos: usize, window_end: usize, min_len: usize) -> usize {
    let floor = pos + min_len.max(1);
    let boundaries: [fn(&[char], usize) -> bool; 5] = [
        is_paragraph_break,
        is_line_break,
        is_sentence_end,
        is_clause_break,
        is_space,
    ];
    for boundary in boundaries {
        // `i` is the index of the last char kept in the chunk.
        let mut i = window_end;
        while i > floor {
            i -= 1;
            if boundary(chars, i) {
                return i + 1;
            }
        }
    }
    window_end
}

fn is_paragraph_break(chars: &[char], i: usize) -> bool {
    chars[i] == '\n' && i > 0 && chars[i - 1] == '\n'
}

fn is_line_break(chars: &[char], i: usize) -> bool {
    chars[i] == '\n'
}

fn followed_by_space(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).map_or(true, |c| c.is_whitespace())
}

fn is_sentence_end(chars: &[char], i: usize) -> bool {
    match chars[i] {
        '。' | '！' | '？' | '．' => true,
        '.' | '!' | '?' => followed_by_space(chars, i),
        _ => false,
    }
}

fn is_clause_break(chars: &[char], i: usize) -> bool {
    match chars[i] {
        '、' | '，' => true,
        ',' => followed_by_space(chars, i),
        _ => false,
    }
}

fn is_space(chars: &[char], i: usize) -> bool {
    chars[i] == ' ' || chars[i] == '\u{3000}'
}

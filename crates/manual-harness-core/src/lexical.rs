//! Tenant-scoped in-memory keyword index.
//!
//! A lightweight inverted index used as the fallback retrieval path when
//! no embeddings are available. It works at document granularity over the
//! raw document text.
//!
//! # Tokenization
//!
//! Text is lower-cased and split into runs of either Latin letters/digits
//! or CJK/Hiragana/Katakana characters. Runs of a single character are
//! dropped in both scripts, so isolated particles such as `は` or `の`
//! never count as evidence. No morphological analysis is attempted: a CJK run is kept
//! whole and matched as a substring, which approximates coverage for
//! unsegmented Japanese and Chinese text.
//!
//! # Scoring
//!
//! ```text
//! score = Σ over distinct query terms of presence(term)
//!       + PHRASE_BONUS if the whole query occurs verbatim
//! ```
//!
//! `presence` is 1.0 for a Latin token found in the postings or a CJK run
//! found as a substring. A CJK run that does not occur whole earns the
//! fraction of its character bigrams that do occur, when that fraction is
//! at least [`MIN_BIGRAM_COVERAGE`]. Documents scoring 0 are never
//! returned. Ties are broken by shorter document id, then insertion order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{RagError, Result};
use crate::models::TenantId;

/// Bonus added when the lower-cased query occurs verbatim in the document.
pub const PHRASE_BONUS: f64 = 2.0;
/// Minimum bigram coverage for partial credit on a CJK run.
pub const MIN_BIGRAM_COVERAGE: f64 = 0.5;
/// Default half-width of an excerpt window, in characters.
pub const DEFAULT_EXCERPT_CHARS: usize = 100;
/// Length of the head excerpt used when no match position is found.
const HEAD_EXCERPT_CHARS: usize = 200;

/// A token with the script class that decides how it is matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Latin letters/digits, matched by whole-token equality.
    Word(String),
    /// CJK/Kana run, matched as a substring.
    Cjk(String),
}

impl Token {
    pub fn as_str(&self) -> &str {
        match self {
            Token::Word(s) | Token::Cjk(s) => s,
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309f}'   // Hiragana
        | '\u{30a0}'..='\u{30ff}' // Katakana
        | '\u{31f0}'..='\u{31ff}' // Katakana phonetic extensions
        | '\u{3400}'..='\u{4dbf}' // CJK extension A
        | '\u{4e00}'..='\u{9fff}' // CJK unified ideographs
        | '\u{f900}'..='\u{faff}' // CJK compatibility ideographs
        | '\u{ff66}'..='\u{ff9f}' // Half-width Katakana
    )
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() && !is_cjk(c)
}

/// Split text into lower-cased tokens.
pub fn tokenize(text: &str) -> Vec<Token> {
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_cjk = false;

    fn flush(buf: &mut String, cjk: bool, out: &mut Vec<Token>) {
        if buf.is_empty() {
            return;
        }
        let s = std::mem::take(buf);
        if s.chars().count() < 2 {
            return;
        }
        out.push(if cjk { Token::Cjk(s) } else { Token::Word(s) });
    }

    for c in lower.chars() {
        let cjk = is_cjk(c);
        if cjk || is_word_char(c) {
            if !current.is_empty() && cjk != current_cjk {
                flush(&mut current, current_cjk, &mut tokens);
            }
            current_cjk = cjk;
            current.push(c);
        } else {
            flush(&mut current, current_cjk, &mut tokens);
        }
    }
    flush(&mut current, current_cjk, &mut tokens);
    tokens
}

/// A ranked lexical match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalHit {
    pub document_id: String,
    /// Filename or other display label (the document id when none was given).
    pub label: String,
    pub excerpt: String,
    pub score: f64,
}

#[derive(Debug)]
struct IndexedDoc {
    label: String,
    text: String,
    lower: String,
    seq: u64,
    words: HashSet<String>,
}

#[derive(Debug, Default)]
struct Partition {
    docs: HashMap<String, IndexedDoc>,
    postings: HashMap<String, BTreeSet<String>>,
    next_seq: u64,
    /// Set once evicted from the index; writers holding it must retry.
    retired: bool,
}

impl Partition {
    fn remove(&mut self, doc_id: &str) -> bool {
        let Some(doc) = self.docs.remove(doc_id) else {
            return false;
        };
        for word in &doc.words {
            if let Some(ids) = self.postings.get_mut(word) {
                ids.remove(doc_id);
                if ids.is_empty() {
                    self.postings.remove(word);
                }
            }
        }
        true
    }
}

/// Keyword index partitioned by tenant.
///
/// Each tenant owns a separate partition behind its own lock, so writers
/// for one tenant never block readers or writers of another. A partition
/// is dropped when its last document is removed.
#[derive(Debug)]
pub struct LexicalIndex {
    partitions: DashMap<TenantId, Arc<RwLock<Partition>>>,
    excerpt_chars: usize,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(DEFAULT_EXCERPT_CHARS)
    }
}

impl LexicalIndex {
    pub fn new(excerpt_chars: usize) -> Self {
        Self {
            partitions: DashMap::new(),
            excerpt_chars,
        }
    }

    fn partition(&self, tenant: &TenantId) -> Option<Arc<RwLock<Partition>>> {
        self.partitions.get(tenant).map(|p| Arc::clone(p.value()))
    }

    fn partition_or_create(&self, tenant: &TenantId) -> Arc<RwLock<Partition>> {
        let entry = self.partitions.entry(tenant.clone()).or_default();
        Arc::clone(entry.value())
    }

    /// Index a document, labelled by its id.
    pub fn add_document(&self, tenant: &TenantId, doc_id: &str, text: &str) -> Result<()> {
        self.add_labeled(tenant, doc_id, doc_id, text)
    }

    /// Index a document with a display label. Replaces any previous
    /// version of the same document id.
    pub fn add_labeled(&self, tenant: &TenantId, doc_id: &str, label: &str, text: &str) -> Result<()> {
        let words: HashSet<String> = tokenize(text)
            .into_iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w),
                Token::Cjk(_) => None,
            })
            .collect();

        let partition = self.partition_or_create(tenant);
        let mut part = partition.write().map_err(|_| poisoned(tenant))?;
        if part.retired {
            // Evicted between lookup and lock; the map now holds a fresh one.
            drop(part);
            return self.add_labeled(tenant, doc_id, label, text);
        }
        part.remove(doc_id);
        for word in &words {
            part.postings
                .entry(word.clone())
                .or_default()
                .insert(doc_id.to_string());
        }
        let seq = part.next_seq;
        part.next_seq += 1;
        part.docs.insert(
            doc_id.to_string(),
            IndexedDoc {
                label: label.to_string(),
                text: text.to_string(),
                lower: text.to_lowercase(),
                seq,
                words,
            },
        );
        Ok(())
    }

    /// Remove a document. Returns whether it was present.
    pub fn remove_document(&self, tenant: &TenantId, doc_id: &str) -> Result<bool> {
        let Some(partition) = self.partition(tenant) else {
            return Ok(false);
        };
        let (found, empty) = {
            let mut part = partition.write().map_err(|_| poisoned(tenant))?;
            (part.remove(doc_id), part.docs.is_empty())
        };
        if empty {
            self.partitions.remove_if(tenant, |_, partition| match partition.write() {
                Ok(mut part) if part.docs.is_empty() => {
                    part.retired = true;
                    true
                }
                _ => false,
            });
        }
        Ok(found)
    }

    /// Number of tenants currently holding a partition.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Number of documents indexed for `tenant`.
    pub fn document_count(&self, tenant: &TenantId) -> usize {
        self.partition(tenant)
            .and_then(|p| p.read().ok().map(|part| part.docs.len()))
            .unwrap_or(0)
    }

    /// Drop every partition.
    pub fn clear(&self) {
        self.partitions.clear();
    }

    /// Rank the tenant's documents against `query`.
    pub fn search(&self, tenant: &TenantId, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let mut terms = tokenize(query);
        let mut seen = HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let Some(partition) = self.partition(tenant) else {
            return Ok(Vec::new());
        };
        let part = partition.read().map_err(|_| poisoned(tenant))?;

        let query_lower = query.trim().to_lowercase();
        let mut scores: HashMap<&str, f64> = HashMap::new();

        for term in &terms {
            match term {
                Token::Word(w) => {
                    if let Some(ids) = part.postings.get(w) {
                        for id in ids {
                            *scores.entry(id.as_str()).or_insert(0.0) += 1.0;
                        }
                    }
                }
                Token::Cjk(run) => {
                    for (id, doc) in &part.docs {
                        let credit = cjk_presence(run, &doc.lower);
                        if credit > 0.0 {
                            *scores.entry(id.as_str()).or_insert(0.0) += credit;
                        }
                    }
                }
            }
        }

        if !query_lower.is_empty() {
            for (id, doc) in &part.docs {
                if doc.lower.contains(&query_lower) {
                    *scores.entry(id.as_str()).or_insert(0.0) += PHRASE_BONUS;
                }
            }
        }

        let mut ranked: Vec<(&str, f64, &IndexedDoc)> = scores
            .into_iter()
            .filter(|(_, s)| *s > 0.0)
            .filter_map(|(id, s)| part.docs.get(id).map(|d| (id, s, d)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.len().cmp(&b.0.len()))
                .then_with(|| a.2.seq.cmp(&b.2.seq))
        });
        ranked.truncate(limit);

        Ok(ranked
            .into_iter()
            .map(|(id, score, doc)| LexicalHit {
                document_id: id.to_string(),
                label: doc.label.clone(),
                excerpt: extract_excerpt(&doc.text, query, &terms, self.excerpt_chars),
                score,
            })
            .collect())
    }
}

fn poisoned(tenant: &TenantId) -> RagError {
    RagError::Storage(format!("lexical partition for '{}' is poisoned", tenant))
}

/// Credit for a CJK run against a lower-cased document.
fn cjk_presence(run: &str, doc_lower: &str) -> f64 {
    if doc_lower.contains(run) {
        return 1.0;
    }
    let chars: Vec<char> = run.chars().collect();
    if chars.len() < 3 {
        return 0.0;
    }
    let bigrams: Vec<String> = chars.windows(2).map(|w| w.iter().collect()).collect();
    let found = bigrams.iter().filter(|b| doc_lower.contains(b.as_str())).count();
    let coverage = found as f64 / bigrams.len() as f64;
    if coverage >= MIN_BIGRAM_COVERAGE {
        coverage
    } else {
        0.0
    }
}

/// Term-presence score of `terms` against an arbitrary text, using the
/// same matching rules as [`LexicalIndex::search`] (without the phrase
/// bonus).
pub fn match_score(terms: &[Token], text: &str) -> f64 {
    let lower = text.to_lowercase();
    let words: HashSet<String> = tokenize(text)
        .into_iter()
        .filter_map(|t| match t {
            Token::Word(w) => Some(w),
            Token::Cjk(_) => None,
        })
        .collect();
    terms
        .iter()
        .map(|term| match term {
            Token::Word(w) if words.contains(w) => 1.0,
            Token::Word(_) => 0.0,
            Token::Cjk(run) => cjk_presence(run, &lower),
        })
        .sum()
}

/// Byte offset to char offset.
fn char_offset(haystack: &str, byte_pos: usize) -> usize {
    haystack[..byte_pos].chars().count()
}

/// Return a window of `context` characters on either side of the first
/// match of the query (or, failing that, of its first matching term).
pub fn extract_excerpt(content: &str, query: &str, terms: &[Token], context: usize) -> String {
    let lower = content.to_lowercase();
    let query_lower = query.trim().to_lowercase();

    // Lower-casing can change byte lengths; work in chars on a string
    // whose char count matches the original.
    let aligned = lower.chars().count() == content.chars().count();

    let mut hit: Option<(usize, usize)> = None;
    if aligned && !query_lower.is_empty() {
        if let Some(pos) = lower.find(&query_lower) {
            hit = Some((char_offset(&lower, pos), query_lower.chars().count()));
        }
    }
    if hit.is_none() && aligned {
        for term in terms {
            if let Some(pos) = lower.find(term.as_str()) {
                hit = Some((char_offset(&lower, pos), term.as_str().chars().count()));
                break;
            }
        }
    }

    let chars: Vec<char> = content.chars().collect();
    let Some((pos, len)) = hit else {
        if chars.len() > HEAD_EXCERPT_CHARS {
            let head: String = chars[..HEAD_EXCERPT_CHARS].iter().collect();
            return format!("{}...", head);
        }
        return content.to_string();
    };

    let start = pos.saturating_sub(context);
    let end = (pos + len + context).min(chars.len());
    let mut excerpt: String = chars[start..end].iter().collect();
    if start > 0 {
        excerpt.insert_str(0, "...");
    }
    if end < chars.len() {
        excerpt.push_str("...");
    }
    excerpt
}

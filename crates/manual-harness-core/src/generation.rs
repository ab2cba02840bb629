//! Generation backend trait and the built-in extractive generator.
//!
//! Network backends (OpenAI, Ollama) live in the app crate. The
//! [`ExtractiveGenerator`] needs no service: it answers by quoting the
//! context sentences that match the question, and declines with the
//! localized refusal when none do.

use async_trait::async_trait;

use crate::error::Result;
use crate::language::Language;
use crate::lexical::{match_score, tokenize, Token};
use crate::models::ContextItem;

/// Everything a backend needs for one grounded answer.
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Strict-grounding instructions with the rendered context.
    pub system: String,
    /// The user's question.
    pub user: String,
    /// The context items rendered into `system`.
    pub context: Vec<ContextItem>,
    pub language: Language,
}

/// A text generation backend. Output is untrusted.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Words too common to count as evidence that a sentence answers a question.
const STOPWORDS: &[&str] = &[
    "the", "is", "are", "was", "were", "be", "an", "and", "or", "of", "to", "in", "on", "at", "for",
    "what", "when", "where", "which", "who", "how", "why", "do", "does", "did", "can", "could",
    "should", "would", "will", "my", "me", "you", "your", "it", "its", "this", "that", "there",
    "please", "tell", "about", "with", "from", "by", "as", "if", "any",
];

/// Answers by quoting the best-matching context sentences.
#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    max_sentences: usize,
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self { max_sentences: 3 }
    }
}

impl ExtractiveGenerator {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }
}

/// Split text into sentences, keeping terminal punctuation.
fn sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c == '\n' {
            push_sentence(&mut out, &mut current);
            continue;
        }
        current.push(c);
        let terminal = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.get(i + 1).map_or(true, |n| n.is_whitespace()),
            _ => false,
        };
        if terminal {
            push_sentence(&mut out, &mut current);
        }
    }
    push_sentence(&mut out, &mut current);
    out
}

fn push_sentence(out: &mut Vec<String>, current: &mut String) {
    let s = current.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
    current.clear();
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let terms: Vec<Token> = tokenize(&prompt.user)
            .into_iter()
            .filter(|t| match t {
                Token::Word(w) => !STOPWORDS.contains(&w.as_str()),
                Token::Cjk(_) => true,
            })
            .collect();

        let mut scored: Vec<(f64, usize, String, &str)> = Vec::new();
        let mut order = 0usize;
        for item in &prompt.context {
            for sentence in sentences(&item.text) {
                let score = match_score(&terms, &sentence);
                if score > 0.0 {
                    scored.push((score, order, sentence, item.filename.as_str()));
                }
                order += 1;
            }
        }

        if scored.is_empty() {
            return Ok(prompt.language.unrelated_refusal().to_string());
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        let mut picked: Vec<(usize, String, &str)> = Vec::new();
        for (_, order, sentence, filename) in scored {
            if picked.iter().any(|(_, s, _)| *s == sentence) {
                continue;
            }
            picked.push((order, sentence, filename));
            if picked.len() == self.max_sentences {
                break;
            }
        }
        picked.sort_by_key(|(order, _, _)| *order);

        let mut answer = prompt.language.found_heading().to_string();
        for (_, sentence, filename) in picked {
            answer.push_str(&format!("\n- {} ({})", sentence, filename));
        }
        Ok(answer)
    }
}

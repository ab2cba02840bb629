//! Grounded answering.
//!
//! [`GroundedAnswerer::answer`] retrieves context for the question and asks
//! the generation backend to answer from that context only.
//!
//! Guarantees, strongest first:
//!
//! - A question containing an emergency keyword (any supported language)
//!   gets a fixed escalation reply with `escalated = true`. Neither
//!   retrieval nor the backend runs.
//! - No context means a fixed localized refusal and no backend call.
//! - A backend failure (timeout, transport, empty output) yields a fixed
//!   localized fallback with `degraded = true`; the answer text is never
//!   empty.
//! - Backend output containing the unrelated-question sentence is reported
//!   as `refused = true`. This is a heuristic: nothing verifies that a
//!   non-refusal answer actually stayed within the context.
//! - Backend output containing a blocked keyword, or shorter than
//!   `min_answer_chars` once trimmed, is replaced by the unrelated-question
//!   refusal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{GenerationFailure, RagError, Result};
use crate::generation::{Generator, Prompt};
use crate::language::{contains_keyword, is_emergency, Language};
use crate::models::{Answer, SourceRef, TenantId};
use crate::prompt::{render_context, system_prompt};
use crate::retrieve::Retriever;

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerParams {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub generation_timeout: Duration,
    /// Trimmed generated answers shorter than this (in chars) are rejected.
    pub min_answer_chars: usize,
}

impl Default for AnswerParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_context_chars: 6000,
            generation_timeout: Duration::from_secs(30),
            min_answer_chars: 5,
        }
    }
}

pub struct GroundedAnswerer {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    params: AnswerParams,
}

impl GroundedAnswerer {
    pub fn new(retriever: Arc<Retriever>, generator: Arc<dyn Generator>, params: AnswerParams) -> Self {
        Self {
            retriever,
            generator,
            params,
        }
    }

    /// Answer `question` for `tenant`. The language is detected from the
    /// question when not given.
    pub async fn answer(
        &self,
        tenant: &TenantId,
        question: &str,
        language: Option<Language>,
    ) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::invalid("question must not be empty"));
        }
        let language = language.unwrap_or_else(|| Language::detect(question));

        if is_emergency(question) {
            warn!(tenant = %tenant, "Emergency keyword in question, escalating");
            return Ok(Answer {
                text: language.escalation().to_string(),
                sources: Vec::new(),
                refused: false,
                degraded: false,
                escalated: true,
                language,
            });
        }

        let items = self.retriever.retrieve(tenant, question, self.params.top_k).await?;
        if items.is_empty() {
            let has_content = self.retriever.has_content(tenant).await;
            info!(tenant = %tenant, has_content, "No relevant context, refusing");
            let text = if has_content {
                language.unrelated_refusal()
            } else {
                language.no_manual()
            };
            return Ok(refusal(text, language));
        }

        let rendered = render_context(&items, language, self.params.max_context_chars);
        let context: Vec<_> = items.into_iter().take(rendered.used).collect();
        let prompt = Prompt {
            system: system_prompt(language, &rendered.text),
            user: question.to_string(),
            context,
            language,
        };

        let outcome = tokio::time::timeout(self.params.generation_timeout, self.generator.generate(&prompt)).await;
        let failure = match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                if let Some(reason) = self.reject_reason(text.trim()) {
                    warn!(
                        tenant = %tenant,
                        backend = self.generator.name(),
                        reason,
                        "Generated answer rejected"
                    );
                    return Ok(refusal(language.unrelated_refusal(), language));
                }
                let refused = text.contains(language.unrelated_refusal());
                let sources = if refused {
                    Vec::new()
                } else {
                    sources_of(&prompt)
                };
                info!(
                    tenant = %tenant,
                    backend = self.generator.name(),
                    refused,
                    sources = sources.len(),
                    "Answered"
                );
                return Ok(Answer {
                    text: text.trim().to_string(),
                    sources,
                    refused,
                    degraded: false,
                    escalated: false,
                    language,
                });
            }
            Ok(Ok(_)) => GenerationFailure::Empty,
            Ok(Err(RagError::Generation(f))) => f,
            Ok(Err(e)) => GenerationFailure::Backend(e.to_string()),
            Err(_) => GenerationFailure::Timeout,
        };

        warn!(
            tenant = %tenant,
            backend = self.generator.name(),
            error = %failure,
            "Generation failed, returning fallback"
        );
        let text = match failure {
            GenerationFailure::Timeout => language.generation_timeout(),
            _ => language.system_error(),
        };
        Ok(Answer {
            text: text.to_string(),
            sources: Vec::new(),
            refused: false,
            degraded: true,
            escalated: false,
            language,
        })
    }

    fn reject_reason(&self, text: &str) -> Option<&'static str> {
        if text.chars().count() < self.params.min_answer_chars {
            return Some("too short");
        }
        let blocked = Language::ALL
            .iter()
            .any(|lang| contains_keyword(text, lang.blocked_keywords()));
        blocked.then_some("blocked keyword")
    }
}

fn refusal(text: &str, language: Language) -> Answer {
    Answer {
        text: text.to_string(),
        sources: Vec::new(),
        refused: true,
        degraded: false,
        escalated: false,
        language,
    }
}

fn sources_of(prompt: &Prompt) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for item in &prompt.context {
        let source = SourceRef::from(item);
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

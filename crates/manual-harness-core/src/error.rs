//! Error taxonomy for the retrieval and answering core.
//!
//! Every fallible core operation returns [`RagError`]. The variants map
//! one-to-one onto the failure classes callers must treat differently:
//!
//! | Variant | Caller treatment |
//! |---------|------------------|
//! | [`Extraction`](RagError::Extraction) | reject the upload, no retry |
//! | [`EmbeddingService`](RagError::EmbeddingService) | lexical fallback on query, retry on ingest |
//! | [`Generation`](RagError::Generation) | localized fallback answer |
//! | [`QuotaExceeded`](RagError::QuotaExceeded) | actionable "upgrade plan" response |
//! | [`TenantIsolationViolation`](RagError::TenantIsolationViolation) | fail closed, never partial data |

use std::fmt;

use thiserror::Error;

use crate::usage::CounterType;

/// Result alias used across the core crate.
pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RagError {
    /// The uploaded file could not be turned into text.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The embedding backend failed. `retry_queued` is set when the
    /// document was persisted for a later [`retry_pending`](crate::service::RagService::retry_pending).
    #[error("embedding service error: {failure}{}", retry_suffix(.retry_queued))]
    EmbeddingService {
        failure: EmbeddingFailure,
        retry_queued: bool,
    },

    #[error("generation failed: {0}")]
    Generation(GenerationFailure),

    #[error("quota exceeded for tenant '{tenant}': {counter} limit of {limit} reached")]
    QuotaExceeded {
        tenant: String,
        counter: CounterType,
        limit: u64,
    },

    /// Data owned by `found` surfaced in a request made by `expected`.
    #[error("tenant isolation violation: request for '{expected}' touched data of '{found}'")]
    TenantIsolationViolation { expected: String, found: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    pub fn storage<E: fmt::Display>(err: E) -> Self {
        RagError::Storage(err.to_string())
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        RagError::InvalidInput(msg.into())
    }

    pub fn embedding(failure: EmbeddingFailure) -> Self {
        RagError::EmbeddingService {
            failure,
            retry_queued: false,
        }
    }

    /// Transient errors a caller may retry without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingService { .. } | RagError::Generation(_) | RagError::Storage(_)
        )
    }
}

fn retry_suffix(queued: &bool) -> &'static str {
    if *queued {
        " (queued for retry)"
    } else {
        ""
    }
}

/// Why an embedding call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingFailure {
    RateLimited,
    Timeout,
    /// No embedder configured, or the service could not be reached.
    Unavailable(String),
    /// The service answered with something that is not one vector per input.
    Malformed(String),
}

impl fmt::Display for EmbeddingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingFailure::RateLimited => write!(f, "rate limited"),
            EmbeddingFailure::Timeout => write!(f, "timed out"),
            EmbeddingFailure::Unavailable(e) => write!(f, "unavailable: {}", e),
            EmbeddingFailure::Malformed(e) => write!(f, "malformed response: {}", e),
        }
    }
}

/// Why a generation call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    Timeout,
    Network(String),
    /// Non-success status from the backend.
    Backend(String),
    Malformed(String),
    /// The backend answered with an empty body.
    Empty,
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationFailure::Timeout => write!(f, "timed out"),
            GenerationFailure::Network(e) => write!(f, "network error: {}", e),
            GenerationFailure::Backend(e) => write!(f, "backend error: {}", e),
            GenerationFailure::Malformed(e) => write!(f, "malformed response: {}", e),
            GenerationFailure::Empty => write!(f, "empty response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_message_names_counter() {
        let err = RagError::QuotaExceeded {
            tenant: "t1".to_string(),
            counter: CounterType::Documents,
            limit: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("t1"));
        assert!(msg.contains("documents"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn test_retry_queued_suffix() {
        let err = RagError::EmbeddingService {
            failure: EmbeddingFailure::Timeout,
            retry_queued: true,
        };
        assert!(err.to_string().ends_with("(queued for retry)"));
        assert!(err.is_transient());
        assert!(!RagError::invalid("x").is_transient());
    }
}

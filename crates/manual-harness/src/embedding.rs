//! HTTP embedding backends.
//!
//! Implements the core [`Embedder`] trait for:
//! - **OpenAI** (`POST {url}/v1/embeddings`, key from `OPENAI_API_KEY`)
//! - **Ollama** (`POST {url}/api/embed`, default `http://localhost:11434`)
//!
//! Use [`create_embedder`] to build the configured backend; provider
//! `"disabled"` yields `None`, which runs the service in lexical-only mode.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Failures are classified into [`EmbeddingFailure`] so the service can
//! tell a rate limit from an outage or a malformed payload.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tracing::{debug, warn};

use manual_harness_core::embedding::Embedder;
use manual_harness_core::error::{EmbeddingFailure, RagError, Result};

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    OpenAi,
    Ollama,
}

pub struct HttpEmbedder {
    backend: Backend,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    fn new(backend: Backend, config: &EmbeddingConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", config.provider))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", config.provider))?;
        let base = match (backend, &config.url) {
            (_, Some(url)) => url.trim_end_matches('/').to_string(),
            (Backend::OpenAi, None) => OPENAI_DEFAULT_URL.to_string(),
            (Backend::Ollama, None) => OLLAMA_DEFAULT_URL.to_string(),
        };
        let endpoint = match backend {
            Backend::OpenAi => format!("{}/v1/embeddings", base),
            Backend::Ollama => format!("{}/api/embed", base),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            backend,
            client,
            endpoint,
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "input": texts,
        })
    }

    fn parse(&self, json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
        match self.backend {
            Backend::OpenAi => parse_openai_response(json),
            Backend::Ollama => parse_ollama_response(json),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = self.request_body(texts);
        let mut last_failure = EmbeddingFailure::Unavailable("no attempt made".to_string());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "Retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            RagError::embedding(EmbeddingFailure::Malformed(e.to_string()))
                        })?;
                        return self
                            .parse(&json)
                            .map_err(|e| RagError::embedding(EmbeddingFailure::Malformed(e)));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let failure = classify_status(status.as_u16(), &body_text);

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(status = status.as_u16(), attempt, "Embedding service error");
                        last_failure = failure;
                        continue;
                    }

                    // Client error (not 429): don't retry
                    return Err(RagError::embedding(failure));
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Embedding request failed");
                    last_failure = if e.is_timeout() {
                        EmbeddingFailure::Timeout
                    } else {
                        EmbeddingFailure::Unavailable(e.to_string())
                    };
                    continue;
                }
            }
        }

        Err(RagError::embedding(last_failure))
    }
}

fn classify_status(status: u16, body: &str) -> EmbeddingFailure {
    match status {
        429 => EmbeddingFailure::RateLimited,
        _ => EmbeddingFailure::Unavailable(format!("HTTP {}: {}", status, body)),
    }
}

/// `{"data": [{"index": 0, "embedding": [...]}, ...]}`, reordered by index.
fn parse_openai_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or("Invalid OpenAI response: missing data array")?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or("Invalid OpenAI response: missing embedding")?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32(embedding)?));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// `{"embeddings": [[...], ...]}`
fn parse_ollama_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or("Invalid Ollama response: missing embeddings array")?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .ok_or_else(|| "Invalid Ollama response: embedding is not an array".to_string())
                .and_then(|values| to_f32(values))
        })
        .collect()
}

fn to_f32(values: &[serde_json::Value]) -> std::result::Result<Vec<f32>, String> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| format!("non-numeric embedding component: {}", v))
        })
        .collect()
}

/// Build the configured embedder, or `None` when embeddings are disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Some(Arc::new(HttpEmbedder::new(Backend::OpenAi, config, Some(api_key))?)))
        }
        "ollama" => Ok(Some(Arc::new(HttpEmbedder::new(Backend::Ollama, config, None)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_disabled_provider_is_none() {
        assert!(create_embedder(&EmbeddingConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_ollama_endpoint_defaults_and_override() {
        let e = HttpEmbedder::new(Backend::Ollama, &ollama_config(), None).unwrap();
        assert_eq!(e.endpoint, "http://localhost:11434/api/embed");
        assert_eq!(e.dims(), 768);

        let config = EmbeddingConfig {
            url: Some("http://gpu-box:11434/".to_string()),
            ..ollama_config()
        };
        let e = HttpEmbedder::new(Backend::Ollama, &config, None).unwrap();
        assert_eq!(e.endpoint, "http://gpu-box:11434/api/embed");
    }

    #[test]
    fn test_parse_openai_reorders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25], [1.0, 2.0]]});
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.5, 0.25]);
    }

    #[test]
    fn test_parse_ollama_rejects_non_numeric() {
        let json = serde_json::json!({"embeddings": [[0.5, "x"]]});
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(429, ""), EmbeddingFailure::RateLimited);
        assert!(matches!(classify_status(503, "down"), EmbeddingFailure::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let config = EmbeddingConfig {
            url: Some("http://127.0.0.1:9".to_string()),
            max_retries: 0,
            timeout_secs: 2,
            ..ollama_config()
        };
        let e = HttpEmbedder::new(Backend::Ollama, &config, None).unwrap();
        let err = e.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::EmbeddingService {
                failure: EmbeddingFailure::Unavailable(_) | EmbeddingFailure::Timeout,
                ..
            }
        ));
    }
}

//! Generation backends.
//!
//! - `extractive`: the core [`ExtractiveGenerator`], no network.
//! - `openai`: `POST {url}/v1/chat/completions`, key from `OPENAI_API_KEY`.
//! - `ollama`: `POST {url}/api/chat` with `stream: false`.
//! - `disabled`: every call fails, so questions with context get the
//!   localized system-error fallback.
//!
//! The grounding instructions travel as the system message and the
//! question as the user message. Every HTTP call is bounded by the
//! client timeout in addition to the answerer's own timeout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use manual_harness_core::error::{GenerationFailure, RagError, Result};
use manual_harness_core::generation::{ExtractiveGenerator, Generator, Prompt};

use crate::config::GenerationConfig;
use crate::embedding::OLLAMA_DEFAULT_URL;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn messages(prompt: &Prompt) -> Vec<ChatMessage<'_>> {
    vec![
        ChatMessage {
            role: "system",
            content: &prompt.system,
        },
        ChatMessage {
            role: "user",
            content: &prompt.user,
        },
    ]
}

fn fail(failure: GenerationFailure) -> RagError {
    RagError::Generation(failure)
}

fn network_failure(e: reqwest::Error) -> RagError {
    if e.is_timeout() {
        fail(GenerationFailure::Timeout)
    } else {
        fail(GenerationFailure::Network(e.to_string()))
    }
}

/// Send `body` to `url` and decode a JSON response of type `T`.
async fn post_json<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &B,
) -> Result<T> {
    let mut request = client.post(url).json(body);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {}", key.trim()));
    }
    let resp = request.send().await.map_err(network_failure)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(fail(GenerationFailure::Backend(format!("{}: {}", status, text))));
    }
    resp.json()
        .await
        .map_err(|e| fail(GenerationFailure::Malformed(e.to_string())))
}

fn non_empty(text: String) -> Result<String> {
    if text.trim().is_empty() {
        Err(fail(GenerationFailure::Empty))
    } else {
        Ok(text)
    }
}

// ============ OpenAI ============

pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let body = OpenAiRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: messages(prompt),
        };
        let parsed: OpenAiResponse =
            post_json(&self.client, &self.endpoint, Some(&self.api_key), &body).await?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        non_empty(answer)
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: AssistantMessage,
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let body = OllamaRequest {
            model: &self.model,
            messages: messages(prompt),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };
        let parsed: OllamaResponse = post_json(&self.client, &self.endpoint, None, &body).await?;
        non_empty(parsed.message.content.unwrap_or_default())
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        Err(fail(GenerationFailure::Backend(
            "generation provider is disabled".to_string(),
        )))
    }
}

fn http_client(config: &GenerationConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn base_url(config: &GenerationConfig, default: &str) -> String {
    config
        .url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

fn model(config: &GenerationConfig) -> anyhow::Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("generation.model required for {} provider", config.provider))
}

/// Build the configured generation backend.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator::default())),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Arc::new(OpenAiGenerator {
                client: http_client(config)?,
                endpoint: format!("{}/v1/chat/completions", base_url(config, OPENAI_DEFAULT_URL)),
                api_key,
                model: model(config)?,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            }))
        }
        "ollama" => Ok(Arc::new(OllamaGenerator {
            client: http_client(config)?,
            endpoint: format!("{}/api/chat", base_url(config, OLLAMA_DEFAULT_URL)),
            model: model(config)?,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })),
        other => bail!("Unknown generation provider: {}", other),
    }
}

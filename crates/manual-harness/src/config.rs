//! Configuration parsing and validation.
//!
//! Manual Harness is configured via a TOML file (default `./config/mh.toml`).
//! Every section except `[db]` is optional and falls back to the defaults
//! below.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/mh.sqlite"
//!
//! [chunking]
//! chunk_size = 500
//! overlap = 50
//!
//! [retrieval]
//! top_k = 5
//! candidate_k = 20
//! max_chunks_per_doc = 1
//! min_vector_score = 0.2
//!
//! [embedding]
//! provider = "openai"            # "disabled", "openai", or "ollama"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "extractive"        # "extractive", "openai", "ollama", or "disabled"
//!
//! [plans]
//! default = "starter"
//!
//! [plans.tiers.starter]
//! documents = 5
//! queries = 5000
//! storage_bytes = 10737418240
//! ```
//!
//! API keys are never stored in the file: the OpenAI providers read
//! `OPENAI_API_KEY` from the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use manual_harness_core::answer::AnswerParams;
use manual_harness_core::chunk::{ChunkParams, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use manual_harness_core::lexical::DEFAULT_EXCERPT_CHARS;
use manual_harness_core::retrieve::RetrievalParams;
use manual_harness_core::service::ServiceConfig;
use manual_harness_core::usage::{Limit, PlanCatalog, PlanLimits};

pub const DEFAULT_CONFIG_PATH: &str = "./config/mh.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub plans: PlansConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    DEFAULT_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,
    #[serde(default = "default_min_vector_score")]
    pub min_vector_score: f32,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    #[serde(default)]
    pub lexical_supplement: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
            min_vector_score: default_min_vector_score(),
            excerpt_chars: default_excerpt_chars(),
            lexical_supplement: false,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_candidate_k() -> usize {
    20
}
fn default_max_chunks_per_doc() -> usize {
    1
}
fn default_min_vector_score() -> f32 {
    0.2
}
fn default_excerpt_chars() -> usize {
    DEFAULT_EXCERPT_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or an OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_context_chars: default_max_context_chars(),
            min_answer_chars: default_min_answer_chars(),
        }
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_context_chars() -> usize {
    6000
}
fn default_min_answer_chars() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlansConfig {
    #[serde(default = "default_plan")]
    pub default: String,
    /// Plans defined here replace the built-in plan of the same name.
    #[serde(default)]
    pub tiers: BTreeMap<String, TierConfig>,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            default: default_plan(),
            tiers: BTreeMap::new(),
        }
    }
}

fn default_plan() -> String {
    "starter".to_string()
}

/// Limits of one plan; `-1` means unlimited.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TierConfig {
    pub documents: i64,
    pub queries: i64,
    pub storage_bytes: i64,
}

fn limit_from(field: &str, value: i64) -> Result<Limit> {
    Limit::try_from(value).map_err(|e| anyhow::anyhow!("{}: {}", field, e))
}

impl PlansConfig {
    /// Built-in plans overlaid with the configured tiers.
    pub fn catalog(&self) -> Result<PlanCatalog> {
        let builtin = PlanCatalog::builtin();
        let mut plans: BTreeMap<String, PlanLimits> = BTreeMap::new();
        for name in builtin.names() {
            plans.insert(name.to_string(), *builtin.get(name)?);
        }
        for (name, tier) in &self.tiers {
            let limits = PlanLimits {
                documents: limit_from(&format!("plans.tiers.{}.documents", name), tier.documents)?,
                queries: limit_from(&format!("plans.tiers.{}.queries", name), tier.queries)?,
                storage_bytes: limit_from(
                    &format!("plans.tiers.{}.storage_bytes", name),
                    tier.storage_bytes,
                )?,
            };
            plans.insert(name.clone(), limits);
        }
        Ok(PlanCatalog::new(self.default.clone(), plans)?)
    }
}

impl Config {
    /// Core service tunables derived from this file.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            chunking: ChunkParams {
                chunk_size: self.chunking.chunk_size,
                overlap: self.chunking.overlap,
            },
            retrieval: RetrievalParams {
                top_k: self.retrieval.top_k,
                candidate_k: self.retrieval.candidate_k,
                min_vector_score: self.retrieval.min_vector_score,
                max_chunks_per_doc: self.retrieval.max_chunks_per_doc,
                lexical_supplement: self.retrieval.lexical_supplement,
                embed_timeout: Duration::from_secs(self.embedding.timeout_secs),
            },
            answer: AnswerParams {
                top_k: self.retrieval.top_k,
                max_context_chars: self.generation.max_context_chars,
                generation_timeout: Duration::from_secs(self.generation.timeout_secs),
                min_answer_chars: self.generation.min_answer_chars,
            },
            embed_batch_size: self.embedding.batch_size,
            excerpt_chars: self.retrieval.excerpt_chars,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    let chunking = &config.chunking;
    if chunking.chunk_size < 2 {
        anyhow::bail!("chunking.chunk_size must be >= 2");
    }
    if chunking.overlap >= chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < config.retrieval.top_k {
        anyhow::bail!("retrieval.candidate_k must be >= retrieval.top_k");
    }
    if config.retrieval.max_chunks_per_doc < 1 {
        anyhow::bail!("retrieval.max_chunks_per_doc must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_vector_score) {
        anyhow::bail!("retrieval.min_vector_score must be in [-1.0, 1.0]");
    }

    // Validate embedding
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if embedding.is_enabled() {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }
    if embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    // Validate generation
    let generation = &config.generation;
    match generation.provider.as_str() {
        "extractive" | "disabled" => {}
        "openai" | "ollama" => {
            if generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be extractive, openai, ollama, or disabled.",
            other
        ),
    }
    if generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }
    if generation.max_context_chars == 0 {
        anyhow::bail!("generation.max_context_chars must be > 0");
    }

    // Validate plans
    config.plans.catalog()?;

    Ok(config)
}

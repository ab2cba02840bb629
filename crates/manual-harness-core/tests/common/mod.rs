//! Test doubles shared by the core integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use manual_harness_core::embedding::Embedder;
use manual_harness_core::error::{EmbeddingFailure, GenerationFailure, RagError, Result};
use manual_harness_core::generation::{ExtractiveGenerator, Generator, Prompt};
use manual_harness_core::kv::memory::MemoryKv;
use manual_harness_core::kv::KvStore;
use manual_harness_core::lexical::{tokenize, Token};
use manual_harness_core::models::{NewDocument, TenantId};
use manual_harness_core::service::{RagService, ServiceConfig, ServiceParts};
use manual_harness_core::store::memory::InMemoryVectorStore;
use manual_harness_core::store::VectorStore;
use manual_harness_core::usage::{FixedClock, PlanCatalog};

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each token (or CJK bigram) bumps one hashed bucket.
/// Can be switched into a failing state.
#[derive(Default)]
pub struct HashEmbedder {
    pub failing: AtomicBool,
    pub calls: AtomicUsize,
    /// Total texts embedded across all calls.
    pub texts: AtomicUsize,
}

fn bucket(s: &str) -> usize {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h % DIMS as u64) as usize
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in tokenize(text) {
        match token {
            Token::Word(w) => v[bucket(&w)] += 1.0,
            Token::Cjk(run) => {
                let chars: Vec<char> = run.chars().collect();
                for pair in chars.windows(2) {
                    v[bucket(&pair.iter().collect::<String>())] += 1.0;
                }
            }
        }
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::embedding(EmbeddingFailure::Unavailable(
                "connection refused".to_string(),
            )));
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

/// Wraps a [`MemoryKv`]; document record writes fail while `fail_doc_writes` is set.
pub struct FaultyKv {
    pub inner: Arc<MemoryKv>,
    pub fail_doc_writes: AtomicBool,
}

#[async_trait]
impl KvStore for FaultyKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.starts_with("doc/") && self.fail_doc_writes.load(Ordering::SeqCst) {
            return Err(RagError::Storage("disk full".to_string()));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.inner.incr(key, delta).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.inner.scan_prefix(prefix).await
    }
}

/// How a [`ScriptedGenerator`] behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// Delegate to the extractive generator.
    Extractive,
    Reply(String),
    Fail,
    Hang,
}

/// Generator that counts calls and follows a script.
pub struct ScriptedGenerator {
    pub script: Script,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Extractive => ExtractiveGenerator::default().generate(prompt).await,
            Script::Reply(text) => Ok(text.clone()),
            Script::Fail => Err(RagError::Generation(GenerationFailure::Network(
                "connection reset".to_string(),
            ))),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}

/// A service wired to in-memory adapters, with handles to its doubles.
pub struct Harness {
    pub service: RagService,
    pub kv: Arc<MemoryKv>,
    pub faults: Arc<FaultyKv>,
    pub vectors: Arc<InMemoryVectorStore>,
    pub embedder: Arc<HashEmbedder>,
    pub generator: Arc<ScriptedGenerator>,
    pub clock: Arc<FixedClock>,
}

pub struct HarnessBuilder {
    script: Script,
    with_embedder: bool,
    plans: PlanCatalog,
    config: ServiceConfig,
    kv: Option<Arc<MemoryKv>>,
    vectors: Option<Arc<InMemoryVectorStore>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            script: Script::Extractive,
            with_embedder: true,
            plans: PlanCatalog::builtin(),
            config: ServiceConfig::default(),
            kv: None,
            vectors: None,
        }
    }

    pub fn script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }

    pub fn lexical_only(mut self) -> Self {
        self.with_embedder = false;
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, kv: Arc<MemoryKv>, vectors: Arc<InMemoryVectorStore>) -> Self {
        self.kv = Some(kv);
        self.vectors = Some(vectors);
        self
    }

    pub fn build(self) -> Harness {
        let kv: Arc<MemoryKv> = self.kv.unwrap_or_default();
        let faults = Arc::new(FaultyKv {
            inner: Arc::clone(&kv),
            fail_doc_writes: AtomicBool::new(false),
        });
        let vectors = self.vectors.unwrap_or_default();
        let embedder = Arc::new(HashEmbedder::default());
        let generator = Arc::new(ScriptedGenerator::new(self.script));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        ));
        let service = RagService::new(
            ServiceParts {
                kv: Arc::clone(&faults) as Arc<dyn KvStore>,
                vectors: Arc::clone(&vectors) as Arc<dyn VectorStore>,
                embedder: if self.with_embedder {
                    Some(Arc::clone(&embedder) as Arc<dyn Embedder>)
                } else {
                    None
                },
                generator: Arc::clone(&generator) as Arc<dyn Generator>,
                clock: Arc::clone(&clock) as Arc<dyn manual_harness_core::usage::Clock>,
                plans: self.plans,
            },
            self.config,
        )
        .unwrap();
        Harness {
            service,
            kv,
            faults,
            vectors,
            embedder,
            generator,
            clock,
        }
    }
}

pub fn tenant(id: &str) -> TenantId {
    TenantId::new(id).unwrap()
}

pub fn doc(id: &str, text: &str) -> NewDocument {
    NewDocument {
        id: id.to_string(),
        filename: id.to_string(),
        text: text.to_string(),
    }
}

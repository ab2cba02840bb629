//! # Manual Harness Core
//!
//! Tenant-scoped retrieval and grounded answering over uploaded manuals:
//! data models, chunking, the lexical and vector indexes, retrieval, the
//! grounded answerer, usage accounting, and the [`service::RagService`]
//! facade that ties them together.
//!
//! Persistence and model backends are traits ([`kv::KvStore`],
//! [`store::VectorStore`], [`embedding::Embedder`],
//! [`generation::Generator`]). In-memory adapters and the extractive
//! generator live here; SQLite and HTTP backends live in the
//! `manual-harness` app crate.

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod kv;
pub mod language;
pub mod lexical;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod service;
pub mod store;
pub mod usage;

pub use error::{RagError, Result};

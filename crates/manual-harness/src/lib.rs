//! # Manual Harness
//!
//! **Multi-tenant question answering grounded in uploaded manuals.**
//!
//! This crate is the application layer around
//! [`manual_harness_core`]: it reads configuration, persists everything in
//! SQLite, talks to the embedding and generation services over HTTP,
//! extracts text from uploads and exposes the `mh` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────────────┐
//! │ Uploads  │──▶│  Extraction  │──▶│      RagService        │
//! │ pdf/docx │   │ pdf/ooxml/txt│   │ chunk → embed → index  │
//! └──────────┘   └──────────────┘   └──────────┬────────────┘
//!                                              │
//!                    ┌─────────────────────────┼──────────────┐
//!                    ▼                         ▼              ▼
//!              ┌──────────┐            ┌─────────────┐  ┌──────────┐
//!              │  SQLite  │            │  Embedding  │  │Generation│
//!              │ kv+vecs  │            │ OpenAI/Olla │  │ backends │
//!              └──────────┘            └─────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool (WAL) |
//! | [`migrate`] | Idempotent schema creation |
//! | [`sqlite_kv`] | `KvStore` over the `kv` table |
//! | [`sqlite_store`] | `VectorStore` over the `chunk_vectors` table |
//! | [`embedding`] | OpenAI and Ollama embedders with retry |
//! | [`generation`] | Extractive, OpenAI and Ollama generators |
//! | [`extract`] | Text extraction for PDF, DOCX, PPTX, XLSX, text |
//! | [`ingest`] | Loading upload files into documents |
//! | [`app`] | Service construction from configuration |
//! | [`commands`] | `mh` subcommand handlers |
//! | [`logging`] | `tracing-subscriber` setup |

pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod sqlite_kv;
pub mod sqlite_store;

//! # Manual Harness CLI (`mh`)
//!
//! Ingest manuals per tenant and answer questions strictly from them.
//!
//! ## Usage
//!
//! ```bash
//! mh --config ./config/mh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mh init` | Create the SQLite database and run schema migrations |
//! | `mh ingest --tenant <t> <files>...` | Extract, chunk, embed and index manuals |
//! | `mh delete --tenant <t> <id>` | Remove a document and everything derived from it |
//! | `mh ask --tenant <t> "<question>"` | Grounded answer with sources |
//! | `mh search --tenant <t> "<query>"` | Retrieval only, not metered |
//! | `mh documents --tenant <t>` | List documents and pending ingestions |
//! | `mh retry --tenant <t>` | Re-run ingestions that failed on the embedding service |
//! | `mh usage --tenant <t>` | This month's counters against the plan limits |
//! | `mh plan --tenant <t> [<plan>]` | Show plans or assign one |
//!
//! ## Examples
//!
//! ```bash
//! mh init
//! mh ingest --tenant hotel-a ./manuals/faq.pdf ./manuals/rooms.docx
//! mh ask --tenant hotel-a "What time is check-in?"
//! mh usage --tenant hotel-a
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use manual_harness::{app, commands, config, logging};
use manual_harness_core::language::Language;
use manual_harness_core::models::TenantId;

/// Manual Harness CLI: multi-tenant question answering grounded in
/// uploaded manuals.
#[derive(Parser)]
#[command(
    name = "mh",
    about = "Manual Harness: answer questions strictly from each tenant's manuals",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging for the harness crates (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Ingest (or re-ingest) manual files.
    ///
    /// Supported formats: pdf, docx, pptx, xlsx, txt, md. The document id
    /// is the file name unless `--id` is given; re-ingesting an id
    /// replaces the previous version.
    Ingest {
        #[arg(long)]
        tenant: String,

        /// Files to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Document id override (single file only).
        #[arg(long)]
        id: Option<String>,
    },

    /// Delete a document.
    Delete {
        #[arg(long)]
        tenant: String,

        /// Document id.
        id: String,
    },

    /// Ask a question. Consumes one query unit.
    Ask {
        #[arg(long)]
        tenant: String,

        question: String,

        /// Answer language (ja, en, zh, ko). Detected from the question by default.
        #[arg(long)]
        lang: Option<Language>,

        /// Print the answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search a tenant's manuals without generating an answer.
    Search {
        #[arg(long)]
        tenant: String,

        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// List documents and pending ingestions.
    Documents {
        #[arg(long)]
        tenant: String,
    },

    /// Retry ingestions that failed on the embedding service.
    Retry {
        #[arg(long)]
        tenant: String,
    },

    /// Show this month's usage.
    Usage {
        #[arg(long)]
        tenant: String,

        /// Print usage as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List plans, or assign one to the tenant.
    Plan {
        #[arg(long)]
        tenant: String,

        /// Plan to assign.
        plan: Option<String>,
    },
}

impl Commands {
    fn tenant(&self) -> Option<&str> {
        match self {
            Commands::Init => None,
            Commands::Ingest { tenant, .. }
            | Commands::Delete { tenant, .. }
            | Commands::Ask { tenant, .. }
            | Commands::Search { tenant, .. }
            | Commands::Documents { tenant }
            | Commands::Retry { tenant }
            | Commands::Usage { tenant, .. }
            | Commands::Plan { tenant, .. } => Some(tenant),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let pool = app::open_database(&cfg).await?;

    let Some(tenant) = cli.command.tenant() else {
        pool.close().await;
        println!("Database initialized successfully.");
        return Ok(());
    };
    let tenant = TenantId::new(tenant)?;
    let service = app::build_service(&cfg, pool.clone()).await?;

    let result = match cli.command {
        Commands::Init => Ok(()),
        Commands::Ingest { paths, id, .. } => {
            commands::run_ingest(&service, &tenant, &paths, id.as_deref()).await
        }
        Commands::Delete { id, .. } => commands::run_delete(&service, &tenant, &id).await,
        Commands::Ask {
            question,
            lang,
            json,
            ..
        } => commands::run_ask(&service, &tenant, &question, lang, json).await,
        Commands::Search { query, limit, .. } => {
            commands::run_search(&service, &tenant, &query, limit).await
        }
        Commands::Documents { .. } => commands::run_documents(&service, &tenant).await,
        Commands::Retry { .. } => commands::run_retry(&service, &tenant).await,
        Commands::Usage { json, .. } => commands::run_usage(&service, &tenant, json).await,
        Commands::Plan { plan, .. } => commands::run_plan(&service, &tenant, plan.as_deref()).await,
    };

    pool.close().await;
    result
}

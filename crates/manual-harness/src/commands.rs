//! Command handlers behind the `mh` subcommands.
//!
//! Each handler takes a constructed [`RagService`], performs one
//! operation for one tenant and prints the result to stdout.

use std::path::PathBuf;

use anyhow::{bail, Result};

use manual_harness_core::error::RagError;
use manual_harness_core::language::Language;
use manual_harness_core::models::{IngestReport, TenantId};
use manual_harness_core::service::{BatchOutcome, RagService};
use manual_harness_core::usage::CounterType;

use crate::ingest::load_document;

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Turn a quota error into an actionable message.
fn quota_hint(tenant: &TenantId, err: RagError) -> anyhow::Error {
    match err {
        RagError::QuotaExceeded { .. } => anyhow::anyhow!(
            "{}. Upgrade the plan with `mh plan --tenant {} <plan>`.",
            err,
            tenant
        ),
        other => other.into(),
    }
}

fn describe(report: &IngestReport) -> String {
    let mut line = format!("{} chunks", report.chunk_count);
    if report.replaced {
        line.push_str(", replaced previous version");
    }
    if !report.embedded {
        line.push_str(", keyword only");
    }
    line
}

/// Print one line per document; fails if any document failed.
fn print_outcomes(action: &str, outcomes: &BatchOutcome) -> Result<()> {
    let mut failed = 0;
    for (id, result) in outcomes {
        match result {
            Ok(report) => println!("{} {}: {}", action, id, describe(report)),
            Err(e) => {
                failed += 1;
                println!("failed {}: {}", id, e);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} documents failed", failed, outcomes.len());
    }
    Ok(())
}

pub async fn run_ingest(
    service: &RagService,
    tenant: &TenantId,
    paths: &[PathBuf],
    id: Option<&str>,
) -> Result<()> {
    if id.is_some() && paths.len() != 1 {
        bail!("--id can only be used with a single file");
    }

    let mut outcomes: BatchOutcome = Vec::with_capacity(paths.len());
    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        match load_document(path, id) {
            Ok(doc) => docs.push(doc),
            Err(e) => outcomes.push((
                path.display().to_string(),
                Err(RagError::Extraction(format!("{:#}", e))),
            )),
        }
    }
    outcomes.extend(service.ingest_batch(tenant, docs).await);
    print_outcomes("ingested", &outcomes)
}

pub async fn run_delete(service: &RagService, tenant: &TenantId, id: &str) -> Result<()> {
    if service.delete_document(tenant, id).await? {
        println!("deleted {}", id);
    } else {
        println!("not found: {}", id);
    }
    Ok(())
}

pub async fn run_ask(
    service: &RagService,
    tenant: &TenantId,
    question: &str,
    language: Option<Language>,
    json: bool,
) -> Result<()> {
    let answer = service
        .query(tenant, question, language)
        .await
        .map_err(|e| quota_hint(tenant, e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            match source.chunk_index {
                Some(index) => println!("  - {} (chunk {})", source.filename, index),
                None => println!("  - {}", source.filename),
            }
        }
    }
    Ok(())
}

pub async fn run_search(
    service: &RagService,
    tenant: &TenantId,
    query: &str,
    limit: usize,
) -> Result<()> {
    let items = service.search(tenant, query, limit).await?;
    if items.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, item) in items.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, item.score, item.filename);
        println!("    document: {}", item.document_id);
        if let Some(index) = item.chunk_index {
            println!("    chunk: {}", index);
        }
        println!("    excerpt: \"{}\"", item.text.replace('\n', " ").trim());
        println!();
    }
    Ok(())
}

pub async fn run_usage(service: &RagService, tenant: &TenantId, json: bool) -> Result<()> {
    let usage = service.get_usage(tenant).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&usage)?);
        return Ok(());
    }

    println!("usage {} ({}, plan {})", usage.tenant, usage.month, usage.plan);
    for counter in CounterType::ALL {
        let c = usage.counter(counter);
        println!("  {:<14} {} / {}", format!("{}:", counter), c.used, c.limit);
    }
    Ok(())
}

pub async fn run_documents(service: &RagService, tenant: &TenantId) -> Result<()> {
    let docs = service.list_documents(tenant).await?;
    let pending = service.list_pending(tenant).await?;
    if docs.is_empty() && pending.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    for doc in &docs {
        println!(
            "{}  {}  {} bytes  {} chunks  {}",
            doc.id,
            doc.filename,
            doc.byte_size,
            doc.chunk_count,
            format_ts(doc.ingested_at)
        );
    }
    for p in &pending {
        println!(
            "{}  {}  pending since {}: {}",
            p.id,
            p.filename,
            format_ts(p.failed_at),
            p.error
        );
    }
    Ok(())
}

pub async fn run_retry(service: &RagService, tenant: &TenantId) -> Result<()> {
    let outcomes = service.retry_pending(tenant).await?;
    if outcomes.is_empty() {
        println!("No pending documents.");
        return Ok(());
    }
    print_outcomes("ingested", &outcomes)
}

pub async fn run_plan(service: &RagService, tenant: &TenantId, plan: Option<&str>) -> Result<()> {
    match plan {
        Some(plan) => {
            service.set_plan(tenant, plan).await?;
            println!("plan {} -> {}", tenant, plan);
        }
        None => {
            let current = service.ledger().plan_for(tenant).await?;
            let catalog = service.ledger().catalog();
            for name in catalog.names() {
                let limits = catalog.get(name)?;
                let marker = if name == current { "*" } else { " " };
                println!(
                    "{} {:<12} documents {}  queries {}  storage_bytes {}",
                    marker, name, limits.documents, limits.queries, limits.storage_bytes
                );
            }
        }
    }
    Ok(())
}

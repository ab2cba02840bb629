//! File loading for `mh ingest`.
//!
//! Reads an upload from disk, picks the extractor from the file
//! extension and produces the [`NewDocument`] handed to the service.
//! The document id defaults to the file name with characters that are
//! not allowed in ids replaced by `_`, so re-ingesting the same file
//! replaces the earlier version.

use std::path::Path;

use anyhow::{bail, Context, Result};

use manual_harness_core::models::{validate_document_id, NewDocument};

use crate::extract::{content_type_for_path, extract_text};

/// Uploads above this size are rejected before extraction.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .with_context(|| format!("Not a file path: {}", path.display()))
}

/// Document id derived from a file name.
pub fn document_id_for(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c == '/' || c.is_whitespace() || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Read and extract one file. `id` overrides the derived document id.
pub fn load_document(path: &Path, id: Option<&str>) -> Result<NewDocument> {
    let filename = file_name(path)?;
    let content_type = content_type_for_path(path).with_context(|| {
        format!(
            "Unsupported file type: {} (expected pdf, docx, pptx, xlsx, txt, or md)",
            filename
        )
    })?;

    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?
        .len();
    if size > MAX_UPLOAD_BYTES {
        bail!(
            "File too large: {} is {} bytes (limit {} MB)",
            filename,
            size,
            MAX_UPLOAD_BYTES / (1024 * 1024)
        );
    }

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    let text = extract_text(&bytes, content_type)
        .with_context(|| format!("Failed to extract text from {}", filename))?;

    let id = match id {
        Some(id) => id.to_string(),
        None => document_id_for(&filename),
    };
    validate_document_id(&id)?;

    Ok(NewDocument { id, filename, text })
}

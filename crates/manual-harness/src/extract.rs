//! Text extraction for uploaded manuals.
//!
//! Turns the bytes of an upload into plain UTF-8 text for the chunker.
//! Supported: PDF, DOCX, PPTX, XLSX, and plain text/markdown. Paragraphs,
//! slides and spreadsheet rows are separated by blank lines or newlines so
//! that the chunker can cut on them.
//!
//! Every failure maps to [`RagError::Extraction`]; nothing here panics on
//! malformed input.

use std::io::Read;
use std::path::Path;

use manual_harness_core::error::RagError;
use quick_xml::events::Event;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Zip-bomb guard for a single archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn fail(kind: &str, e: impl std::fmt::Display) -> RagError {
    RagError::Extraction(format!("{}: {}", kind, e))
}

/// Content type for a file name, by extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "pptx" => Some(MIME_PPTX),
        "xlsx" => Some(MIME_XLSX),
        "txt" | "text" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, RagError> {
    let text = match content_type {
        MIME_PDF => extract_pdf(bytes)?,
        MIME_DOCX => extract_docx(bytes)?,
        MIME_PPTX => extract_pptx(bytes)?,
        MIME_XLSX => extract_xlsx(bytes)?,
        MIME_TEXT | MIME_MARKDOWN => decode_text(bytes)?,
        other => {
            return Err(RagError::Extraction(format!(
                "unsupported content-type: {}",
                other
            )))
        }
    };
    let text = normalize_newlines(&text);
    if text.trim().is_empty() {
        return Err(RagError::Extraction("no text found in file".to_string()));
    }
    Ok(text)
}

fn decode_text(bytes: &[u8]) -> Result<String, RagError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|e| fail("text is not valid UTF-8", e))
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn extract_pdf(bytes: &[u8]) -> Result<String, RagError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| fail("PDF extraction failed", e))
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, RagError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| fail("OOXML extraction failed", e))
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, RagError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| fail("OOXML extraction failed", format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| fail("OOXML extraction failed", e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(fail(
            "OOXML extraction failed",
            format!("entry {} exceeds {} bytes", name, MAX_XML_ENTRY_BYTES),
        ));
    }
    Ok(out)
}

/// Collect the text of every `<text_tag>` element, starting a new
/// paragraph at the end of every `<block_tag>` element.
fn collect_text(xml: &[u8], text_tag: &[u8], block_tag: &[u8]) -> Result<String, RagError> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == text_tag => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == text_tag {
                    in_text = false;
                } else if name.as_ref() == block_tag {
                    let p = current.trim();
                    if !p.is_empty() {
                        paragraphs.push(p.to_string());
                    }
                    current.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(fail("OOXML extraction failed", e)),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

fn extract_docx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text(&xml, b"t", b"p")
}

fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_pptx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = open_archive(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = collect_text(&xml, b"t", b"p")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = open_archive(bytes)?;
    let shared = read_shared_strings(&mut archive)?;
    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let rows = sheet_rows(&xml, &shared)?;
        if !rows.is_empty() {
            sheets.push(rows);
        }
    }
    Ok(sheets.join("\n\n"))
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, RagError> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => current.push_str(te.unescape().unwrap_or_default().as_ref()),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(fail("OOXML extraction failed", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// One line per row, cells separated by tabs.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, RagError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut in_value = false;
    let mut shared_cell = false;
    let mut cells = 0usize;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    while cells < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s");
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    let text = if shared_cell {
                        value.parse::<usize>().ok().and_then(|i| shared.get(i).cloned())
                    } else {
                        Some(value.to_string())
                    };
                    if let Some(text) = text {
                        row.push(text);
                        cells += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(fail("OOXML extraction failed", e)),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows.join("\n"))
}

//! Format-dispatched text extraction.
//!
//! Converts a source file into plain text plus lightweight metadata. Four
//! formats are supported (`pdf`, `docx`, `txt`, `md`); legacy word-processor
//! formats are rejected up front. PDF pages are pulled in fixed-size batches
//! so the working set stays bounded on large manuals; DOCX is unpacked as a
//! ZIP and the `w:t` runs are streamed out of `word/document.xml`.

use std::io::Read;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::RagError;
use crate::models::{Extracted, ExtractMeta, FileType};

/// Pages extracted per batch; per-page buffers are dropped at the boundary.
const PDF_PAGE_BATCH: usize = 10;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const MIB: u64 = 1024 * 1024;

/// File extensions the pipeline accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md"];

/// True when the path carries a supported extension.
pub fn is_supported(path: &Path) -> bool {
    file_type_of(path).is_ok()
}

/// Resolve the [`FileType`] for a path from its extension.
pub fn file_type_of(path: &Path) -> Result<FileType, RagError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    FileType::from_extension(&ext)
}

/// Extract plain text and metadata from `path`.
///
/// Fails with `UnsupportedFormat` for unknown extensions, `OversizedSource`
/// above `max_file_size_mib`, and `CorruptSource` when the parser rejects
/// the bytes. Files in the upper half of the allowed size proceed with a
/// warning.
pub fn extract(path: &Path, max_file_size_mib: u64) -> Result<Extracted, RagError> {
    let filetype = file_type_of(path)?;

    let stat = std::fs::metadata(path)
        .map_err(|e| RagError::CorruptSource(format!("{}: {e}", path.display())))?;
    let size = stat.len();
    if size > max_file_size_mib * MIB {
        return Err(RagError::OversizedSource {
            actual_mib: size.div_ceil(MIB),
            limit_mib: max_file_size_mib,
        });
    }
    if size >= max_file_size_mib * MIB / 2 {
        warn!(
            path = %path.display(),
            size_mib = size / MIB,
            "large source file; extraction may be slow"
        );
    }

    let mut extracted = match filetype {
        FileType::Pdf => extract_pdf(path)?,
        FileType::Docx => extract_docx(path)?,
        FileType::Txt => extract_plain(path, false)?,
        FileType::Md => extract_plain(path, true)?,
    };

    extracted.meta.word_count = extracted.text.split_whitespace().count();
    if extracted.meta.language.is_none() {
        extracted.meta.language = detect_language(&extracted.text);
    }
    extracted.meta.created_at = stat
        .created()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);
    extracted.meta.modified_at = stat
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);

    Ok(extracted)
}

// ============ PDF ============

fn extract_pdf(path: &Path) -> Result<Extracted, RagError> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| RagError::CorruptSource(format!("pdf parse failed: {e}")))?;

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut page_texts: Vec<String> = Vec::new();

    for batch in page_numbers.chunks(PDF_PAGE_BATCH) {
        for &page in batch {
            // A single unreadable page should not sink the document.
            let raw = match doc.extract_text(&[page]) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(page, "skipping unreadable pdf page: {e}");
                    continue;
                }
            };
            let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            if !joined.is_empty() {
                page_texts.push(joined);
            }
        }
        // Raw page buffers go out of scope here, at the batch boundary.
        debug!(
            pages_done = page_texts.len(),
            pages_total = page_numbers.len(),
            "pdf page batch extracted"
        );
    }

    let meta = ExtractMeta {
        page_count: Some(page_numbers.len()),
        title: pdf_info_string(&doc, b"Title"),
        author: pdf_info_string(&doc, b"Author"),
        ..ExtractMeta::default()
    };

    Ok(Extracted {
        text: page_texts.join("\n"),
        meta,
    })
}

/// Read a text entry from the PDF trailer's Info dictionary.
fn pdf_info_string(doc: &lopdf::Document, key: &[u8]) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let dict = match info {
        lopdf::Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        lopdf::Object::Dictionary(dict) => dict,
        _ => return None,
    };
    let bytes = dict.get(key).ok()?.as_str().ok()?;
    let value = String::from_utf8_lossy(bytes).trim().to_string();
    (!value.is_empty()).then_some(value)
}

// ============ DOCX ============

fn extract_docx(path: &Path) -> Result<Extracted, RagError> {
    let file = std::fs::File::open(path)
        .map_err(|e| RagError::CorruptSource(format!("{}: {e}", path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| RagError::CorruptSource(format!("docx is not a zip archive: {e}")))?;

    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    let (text, dropped_runs) = docx_body_text(&doc_xml)?;
    if dropped_runs > 0 {
        info!(dropped_runs, "docx conversion dropped malformed text runs");
    }

    let mut meta = ExtractMeta::default();
    if let Ok(core_xml) = read_zip_entry_bounded(&mut archive, "docProps/core.xml") {
        let (title, author) = docx_core_properties(&core_xml);
        meta.title = title;
        meta.author = author;
    }

    Ok(Extracted { text, meta })
}

fn read_zip_entry_bounded<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, RagError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| RagError::CorruptSource(format!("{name} missing: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| RagError::CorruptSource(format!("{name}: {e}")))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(RagError::CorruptSource(format!(
            "{name} exceeds the {MAX_XML_ENTRY_BYTES}-byte entry limit"
        )));
    }
    Ok(out)
}

/// Pull the `w:t` runs out of `word/document.xml`, one line per paragraph.
/// Returns the text and the count of runs dropped due to escape errors.
fn docx_body_text(xml: &[u8]) -> Result<(String, usize), RagError> {
    let mut out = String::new();
    let mut dropped = 0usize;
    // Text is only captured inside `w:t`, so whitespace between tags never
    // leaks in; trimming is left off to honor `xml:space="preserve"` runs.
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => match t.unescape() {
                Ok(text) => out.push_str(text.as_ref()),
                Err(_) => dropped += 1,
            },
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    if !out.ends_with('\n') && !out.is_empty() {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(RagError::CorruptSource(format!("document.xml: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok((out.trim_end().to_string(), dropped))
}

/// Title and creator from `docProps/core.xml`, when present.
fn docx_core_properties(xml: &[u8]) -> (Option<String>, Option<String>) {
    let mut title = None;
    let mut author = None;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                current = match e.local_name().as_ref() {
                    b"title" => Some("title"),
                    b"creator" => Some("creator"),
                    _ => None,
                };
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if let (Some(field), Ok(text)) = (current, t.unescape()) {
                    let value = text.trim().to_string();
                    if !value.is_empty() {
                        match field {
                            "title" => title = Some(value),
                            _ => author = Some(value),
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::End(_)) => current = None,
            Ok(quick_xml::events::Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (title, author)
}

// ============ TXT / MD ============

fn extract_plain(path: &Path, markdown: bool) -> Result<Extracted, RagError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RagError::CorruptSource(format!("{}: {e}", path.display())))?;

    let mut meta = ExtractMeta::default();
    if markdown {
        meta.title = markdown_title(&text);
    }

    Ok(Extracted { text, meta })
}

/// First level-1 heading of a markdown document, if any.
fn markdown_title(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let line = line.trim_start();
        line.strip_prefix("# ")
            .map(|rest| rest.trim().to_string())
            .filter(|title| !title.is_empty())
    })
}

// ============ Language detection ============

/// Keyword-ratio language heuristic over the first few thousand words.
/// Coarse by design; the result is advisory metadata only.
fn detect_language(text: &str) -> Option<String> {
    const PROFILES: &[(&str, &[&str])] = &[
        (
            "en",
            &["the", "and", "of", "to", "in", "is", "for", "with", "that", "are"],
        ),
        (
            "es",
            &["el", "la", "de", "que", "los", "las", "por", "con", "para", "una"],
        ),
        (
            "fr",
            &["le", "les", "des", "une", "est", "dans", "pour", "que", "avec", "sur"],
        ),
        (
            "de",
            &["der", "die", "das", "und", "ist", "mit", "von", "auf", "nicht", "ein"],
        ),
    ];
    const MIN_WORDS: usize = 10;
    const MIN_RATIO: f64 = 0.05;

    let words: Vec<String> = text
        .split_whitespace()
        .take(2000)
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() < MIN_WORDS {
        return None;
    }

    let mut best: Option<(&str, f64)> = None;
    for (lang, keywords) in PROFILES {
        let hits = words.iter().filter(|w| keywords.contains(&w.as_str())).count();
        let ratio = hits as f64 / words.len() as f64;
        if ratio >= MIN_RATIO && best.map_or(true, |(_, b)| ratio > b) {
            best = Some((lang, ratio));
        }
    }
    best.map(|(lang, _)| lang.to_string())
}

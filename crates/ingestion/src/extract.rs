//! Text extraction
//!
//! Turns a stored file into raw text for chunking. PDFs are parsed with
//! lopdf by walking each page's content stream; anything else is read
//! as UTF-8 with a lossy byte-decode fallback, so unknown formats
//! degrade to best-effort text rather than failing outright. Unreadable
//! input is an error; whether *empty* text is acceptable is the
//! pipeline's call, not ours.

use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("PDF parse error for {path}: {message}")]
    PdfParse { path: String, message: String },

    #[error("Failed to read {path}: {message}")]
    Unreadable { path: String, message: String },
}

/// Trait for text extraction from stored files
pub trait TextExtractor: Send + Sync {
    /// Extract text from the file at `path`, using `mime_type` as a hint.
    fn extract(&self, path: &Path, mime_type: &str) -> Result<String, ExtractionError>;
}

/// Production extractor: PDF via lopdf, everything else as text
#[derive(Default)]
pub struct DefaultExtractor;

impl DefaultExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for DefaultExtractor {
    fn extract(&self, path: &Path, mime_type: &str) -> Result<String, ExtractionError> {
        if is_pdf(path, mime_type) {
            extract_pdf_text(path)
        } else {
            let bytes = std::fs::read(path).map_err(|e| ExtractionError::Unreadable {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            // Valid UTF-8 passes through untouched; anything else is
            // decoded lossily rather than rejected.
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn is_pdf(path: &Path, mime_type: &str) -> bool {
    mime_type == "application/pdf"
        || path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false)
}

/// Extract the text of every page, joined with blank lines.
fn extract_pdf_text(path: &Path) -> Result<String, ExtractionError> {
    let doc = lopdf::Document::load(path).map_err(|e| ExtractionError::PdfParse {
        path: path.display().to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let mut pages = Vec::new();
    for (page_num, page_id) in doc.page_iter().enumerate() {
        match doc.get_page_content(page_id) {
            Ok(content) => {
                let text = page_text(&content);
                let cleaned = normalize_page_text(&text);
                if !cleaned.is_empty() {
                    pages.push(cleaned);
                }
            }
            Err(e) => {
                warn!(page = page_num + 1, error = %e, "Failed to read page content, skipping");
            }
        }
    }

    let full_text = pages.join("\n\n");
    debug!(
        path = %path.display(),
        pages = pages.len(),
        chars = full_text.len(),
        "PDF text extraction complete"
    );
    Ok(full_text)
}

/// Pull shown text out of a page content stream.
///
/// Walks BT/ET text blocks and collects the operands of the `Tj`, `TJ`,
/// `'` and `"` text-showing operators.
fn page_text(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;

    for line in content_str.lines() {
        let trimmed = line.trim();
        match trimmed {
            "BT" => in_text_block = true,
            "ET" => {
                in_text_block = false;
                if !text.ends_with('\n') && !text.is_empty() {
                    text.push('\n');
                }
            }
            _ if in_text_block => {
                if let Some(shown) = operator_text(trimmed) {
                    text.push_str(&shown);
                    text.push(' ');
                }
            }
            _ => {}
        }
    }

    text
}

/// Text operand of a single text-showing operator line, if any.
fn operator_text(line: &str) -> Option<String> {
    let is_simple_show =
        line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"');
    let is_array_show = line.ends_with("TJ");
    if !is_simple_show && !is_array_show {
        return None;
    }

    // Both forms carry their text in parenthesized string literals; the
    // TJ array just has several of them with kerning numbers between.
    let mut result = String::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in line.chars() {
        if in_string {
            if escaped {
                current.push(unescape(ch));
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == ')' {
                in_string = false;
                result.push_str(&current);
                current.clear();
            } else {
                current.push(ch);
            }
        } else if ch == '(' {
            in_string = true;
        }
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

fn unescape(ch: char) -> char {
    match ch {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        other => other,
    }
}

/// Collapse runs of blank lines into a single paragraph break and trim
/// trailing whitespace per line. Paragraph structure must survive for
/// the chunker's separator hierarchy.
fn normalize_page_text(text: &str) -> String {
    let mut out = String::new();
    let mut blank_pending = false;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_pending = !out.is_empty();
            continue;
        }
        if blank_pending {
            out.push_str("\n\n");
            blank_pending = false;
        } else if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_plain_text_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hello plain text").unwrap();

        let text = DefaultExtractor::new()
            .extract(file.path(), "text/plain")
            .unwrap();
        assert_eq!(text, "hello plain text");
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[b'o', b'k', 0xFF, b'!', b'\n']).unwrap();

        let text = DefaultExtractor::new()
            .extract(file.path(), "application/octet-stream")
            .unwrap();
        assert!(text.starts_with("ok"));
        assert!(text.contains('!'));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = DefaultExtractor::new()
            .extract(Path::new("/definitely/not/here.txt"), "text/plain")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Unreadable { .. }));
    }

    #[test]
    fn test_page_text_simple_show() {
        let content = b"BT\n(Hello) Tj\n(World) Tj\nET\n";
        assert_eq!(page_text(content).trim(), "Hello World");
    }

    #[test]
    fn test_page_text_array_show_and_escapes() {
        let content = b"BT\n[(He) -20 (llo)] TJ\n(line\\nbreak) Tj\nET\n";
        let text = page_text(content);
        assert!(text.contains("Hello"));
        assert!(text.contains("line\nbreak"));
    }

    #[test]
    fn test_normalize_collapses_blank_runs() {
        let raw = "first line  \n\n\n\nsecond line\nthird line\n";
        assert_eq!(
            normalize_page_text(raw),
            "first line\n\nsecond line\nthird line"
        );
    }

    #[test]
    fn test_pdf_dispatch_by_extension() {
        assert!(is_pdf(Path::new("a.PDF"), "application/octet-stream"));
        assert!(is_pdf(Path::new("a.bin"), "application/pdf"));
        assert!(!is_pdf(Path::new("a.txt"), "text/plain"));
    }
}

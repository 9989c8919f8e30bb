//! PDF text extraction with page boundaries.
//!
//! Pure over the input bytes: primary extraction is page-granular; if it
//! fails or yields nothing, a whole-document pass runs as fallback with a
//! single synthetic page. Both failing signals `ExtractionFailed`.

use crate::error::{Error, Result};
use crate::models::PageBoundary;

/// Extracted text plus the page boundaries that index into it.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub pages: Vec<PageBoundary>,
}

/// Extract cleaned text and page boundaries from raw PDF bytes.
pub fn extract(bytes: &[u8], doc_key: &str) -> Result<ExtractedText> {
    match extract_by_pages(bytes) {
        Ok(extracted) if !extracted.text.is_empty() => {
            tracing::info!(
                key = doc_key,
                pages = extracted.pages.len(),
                chars = extracted.text.len(),
                "extracted text with page granularity"
            );
            return Ok(extracted);
        }
        Ok(_) => {
            tracing::warn!(key = doc_key, "page extraction produced no text, trying whole-document pass");
        }
        Err(error) => {
            tracing::warn!(key = doc_key, %error, "page extraction failed, trying whole-document pass");
        }
    }

    let whole = pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::ExtractionFailed {
        key: doc_key.to_string(),
        message: e.to_string(),
    })?;
    let text = clean_text(&whole);
    if text.is_empty() {
        return Err(Error::ExtractionFailed {
            key: doc_key.to_string(),
            message: "document contains no extractable text".to_string(),
        });
    }

    tracing::info!(key = doc_key, chars = text.len(), "extracted text without page granularity");
    let end = text.len();
    Ok(ExtractedText {
        text,
        pages: vec![PageBoundary { page: 1, start: 0, end }],
    })
}

fn extract_by_pages(bytes: &[u8]) -> std::result::Result<ExtractedText, pdf_extract::OutputError> {
    let raw_pages = pdf_extract::extract_text_from_mem_by_pages(bytes)?;

    let mut text = String::new();
    let mut pages = Vec::new();

    for (index, raw) in raw_pages.iter().enumerate() {
        let cleaned = clean_text(raw);
        if cleaned.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        let start = text.len();
        text.push_str(&cleaned);
        pages.push(PageBoundary {
            page: (index + 1) as u32,
            start,
            end: text.len(),
        });
    }

    Ok(ExtractedText { text, pages })
}

/// Normalize extracted text: collapse whitespace runs to single spaces, drop
/// control characters, and replace typographic quotes and dashes with their
/// ASCII forms.
pub fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.chars() {
        let ch = match ch {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            other => other,
        };

        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }

    out
}

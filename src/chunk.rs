//! Token-aware sliding-window chunking with page attribution.
//!
//! Token counting is whitespace-word based; the same scheme is used for every
//! token budget in the crate so chunk sizes and embedding budgets agree.

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, PageBoundary};

/// Byte span of one token within the source text.
#[derive(Debug, Clone, Copy)]
struct TokenSpan {
    start: usize,
    end: usize,
}

/// Count tokens in `text` under the crate-wide tokenization scheme.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split a document's text into overlapping, token-bounded chunks.
///
/// The window advances by `max_tokens - overlap_tokens` per step, where
/// `overlap_tokens = round(max_tokens * overlap_fraction)`. The final chunk
/// may be shorter than `max_tokens`. Exceeding `max_chunks_per_document`
/// fails with `DocumentTooLarge` rather than truncating.
pub fn chunk_text(
    text: &str,
    pages: &[PageBoundary],
    config: &ChunkingConfig,
    doc_key: &str,
) -> Result<Vec<Chunk>> {
    let tokens = token_spans(text);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let max_tokens = config.max_tokens.max(1);
    let overlap_tokens = overlap_tokens(max_tokens, config.overlap_fraction);
    let step = (max_tokens - overlap_tokens).max(1);

    let mut chunks = Vec::new();
    let mut index = 0usize;

    loop {
        let end_token = (index + max_tokens).min(tokens.len());
        let start = tokens[index].start;
        let end = tokens[end_token - 1].end;

        if chunks.len() >= config.max_chunks_per_document {
            return Err(Error::DocumentTooLarge {
                key: doc_key.to_string(),
                chunks: chunks.len() + 1,
                max: config.max_chunks_per_document,
            });
        }

        chunks.push(Chunk {
            id: chunks.len() as u32,
            doc_key: doc_key.to_string(),
            text: text[start..end].to_string(),
            token_count: end_token - index,
            pages: pages_covering(pages, start, end),
            start,
            end,
        });

        if end_token == tokens.len() {
            break;
        }
        index += step;
    }

    tracing::info!(key = doc_key, chunks = chunks.len(), "document chunked");
    Ok(chunks)
}

/// Overlap size in tokens for a given window size and fraction.
pub fn overlap_tokens(max_tokens: usize, overlap_fraction: f32) -> usize {
    let fraction = overlap_fraction.clamp(0.0, 0.95);
    ((max_tokens as f32 * fraction).round() as usize).min(max_tokens.saturating_sub(1))
}

fn token_spans(text: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut start = None;

    for (offset, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push(TokenSpan { start: s, end: offset });
            }
        } else if start.is_none() {
            start = Some(offset);
        }
    }
    if let Some(s) = start {
        spans.push(TokenSpan { start: s, end: text.len() });
    }

    spans
}

/// All page numbers whose boundary overlaps the byte range `[start, end)`.
fn pages_covering(pages: &[PageBoundary], start: usize, end: usize) -> Vec<u32> {
    pages
        .iter()
        .filter(|b| b.start < end && b.end > start)
        .map(|b| b.page)
        .collect()
}

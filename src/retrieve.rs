//! Evidence retrieval: semantic search blended with keyword overlap.
//!
//! The query vector is produced under the same embedding strategy the index
//! was built with, then candidates are over-fetched and reranked with a
//! keyword-overlap blend before the final top-k cut.

use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{ParsedQuery, RetrievedEvidence, ScoredChunk};
use std::collections::HashSet;
use std::sync::Arc;

/// Weight given to vector similarity in the blended score; the remainder goes
/// to keyword overlap.
const SEMANTIC_WEIGHT: f32 = 0.7;

pub struct Retriever {
    gateway: Arc<EmbeddingGateway>,
    top_k: usize,
}

impl Retriever {
    pub fn new(gateway: Arc<EmbeddingGateway>, top_k: usize) -> Self {
        Self {
            gateway,
            top_k: top_k.max(1),
        }
    }

    /// Retrieve the top-k chunks for a parsed query from one document's index.
    pub async fn retrieve(
        &self,
        index: &dyn VectorIndex,
        parsed: &ParsedQuery,
        doc_key: &str,
    ) -> Result<RetrievedEvidence> {
        if index.count().await? == 0 {
            return Err(Error::NoEvidenceAvailable { key: doc_key.to_string() });
        }
        let strategy = index.strategy().ok_or_else(|| Error::NoEvidenceAvailable {
            key: doc_key.to_string(),
        })?;

        let query_text = build_query_text(parsed);
        let query_vector = self.gateway.embed_query(&query_text, &strategy).await?;

        // Over-fetch so reranking has candidates to promote past the cut.
        let candidates = index.search(&query_vector, self.top_k * 2).await?;
        let hits = rerank(candidates, &parsed.keywords, self.top_k);

        tracing::debug!(
            doc_key,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score).unwrap_or(0.0),
            "retrieved evidence"
        );
        Ok(RetrievedEvidence { hits })
    }
}

/// Text embedded for the search: subject plus keywords, or the raw question
/// when parsing produced neither.
fn build_query_text(parsed: &ParsedQuery) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !parsed.subject.is_empty() {
        parts.push(&parsed.subject);
    }
    for keyword in &parsed.keywords {
        parts.push(keyword);
    }
    if parts.is_empty() {
        return parsed.original_query.clone();
    }
    parts.join(" ")
}

/// Blend vector similarity with keyword overlap, re-sort, cut to `k`.
///
/// Without keywords the overlap term is zero for every candidate, so the
/// ordering degenerates to raw similarity.
fn rerank(candidates: Vec<ScoredChunk>, keywords: &[String], k: usize) -> Vec<ScoredChunk> {
    let keywords: Vec<String> = keywords.iter().map(|kw| kw.to_lowercase()).collect();

    let mut blended: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|hit| {
            let overlap = keyword_overlap(&hit.chunk.text, &keywords);
            ScoredChunk {
                score: SEMANTIC_WEIGHT * hit.score + (1.0 - SEMANTIC_WEIGHT) * overlap,
                chunk: hit.chunk,
            }
        })
        .collect();

    blended.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
    blended.truncate(k);
    blended
}

/// Fraction of `keywords` present as whole words in `text`, in [0, 1].
fn keyword_overlap(text: &str, keywords: &[String]) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let words: HashSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    let matched = keywords.iter().filter(|kw| words.contains(*kw)).count();
    matched as f32 / keywords.len() as f32
}

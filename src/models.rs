//! Core data model: documents, chunks, parsed queries, evidence, and answers.

use crate::error::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Processing status of a document, advanced by the orchestrator.
///
/// A document never moves backwards; once `Indexed` it only changes by being
/// rebuilt from scratch after index invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Fetching,
    Extracting,
    Chunking,
    Embedding,
    Indexed,
    Failed(Stage),
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Fetching => "fetching",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Failed(stage) => write!(f, "failed ({stage})"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Character offset range of one page within a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBoundary {
    /// 1-based page number.
    pub page: u32,
    /// Byte offset of the page's first character in the full text.
    pub start: usize,
    /// Byte offset one past the page's last character.
    pub end: usize,
}

/// A document tracked by the orchestrator, keyed by a hash of its source URL.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable key derived from the source URL.
    pub key: String,
    /// Where the raw bytes came from.
    pub url: String,
    /// Cleaned extracted text. Empty until extraction completes.
    pub text: String,
    /// Page boundaries in ascending offset order.
    pub pages: Vec<PageBoundary>,
    pub status: DocumentStatus,
    /// Number of chunks produced, once chunking has run.
    pub chunk_count: usize,
    /// When the document reached `Indexed`, if it has.
    pub indexed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Document {
    pub fn new(key: String, url: String) -> Self {
        Self {
            key,
            url,
            text: String::new(),
            pages: Vec::new(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            indexed_at: None,
        }
    }
}

/// An overlapping, token-bounded span of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Sequence number within the owning document.
    pub id: u32,
    /// Key of the owning document.
    pub doc_key: String,
    /// The chunk's text, a contiguous slice of the document text.
    pub text: String,
    /// Token count under the crate-wide whitespace tokenization scheme.
    pub token_count: usize,
    /// All page numbers the chunk's character range touches.
    pub pages: Vec<u32>,
    /// Byte offset range within the document text.
    pub start: usize,
    pub end: usize,
}

/// Closed set of query purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Coverage,
    Eligibility,
    Compliance,
    Definition,
    Procedure,
    General,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Coverage => "coverage",
            QueryIntent::Eligibility => "eligibility",
            QueryIntent::Compliance => "compliance",
            QueryIntent::Definition => "definition",
            QueryIntent::Procedure => "procedure",
            QueryIntent::General => "general",
        }
    }

    /// Parse a label, coercing anything outside the closed set to `General`.
    /// Accepts `coverage_check` as a legacy alias for `coverage`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "coverage" | "coverage_check" => QueryIntent::Coverage,
            "eligibility" => QueryIntent::Eligibility,
            "compliance" => QueryIntent::Compliance,
            "definition" => QueryIntent::Definition,
            "procedure" => QueryIntent::Procedure,
            _ => QueryIntent::General,
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured representation of a user question.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedQuery {
    pub intent: QueryIntent,
    /// The main subject of the question, free text.
    pub subject: String,
    /// Keywords for semantic search, stop-words removed.
    pub keywords: Vec<String>,
    /// Attribute → expected value filters, often empty.
    pub filters: BTreeMap<String, String>,
    /// The question as the user asked it.
    pub original_query: String,
}

/// One retrieved chunk with its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Ranked evidence for one query, at most top-k entries.
#[derive(Debug, Clone, Default)]
pub struct RetrievedEvidence {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievedEvidence {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// The highest-scoring chunk, if any.
    pub fn best(&self) -> Option<&ScoredChunk> {
        self.hits.first()
    }

    /// Distinct page numbers covered by the top `n` hits, ascending.
    pub fn page_references(&self, n: usize) -> Vec<u32> {
        let mut pages: Vec<u32> = self
            .hits
            .iter()
            .take(n)
            .flat_map(|hit| hit.chunk.pages.iter().copied())
            .collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

/// Transparency block attached to an answer.
#[derive(Debug, Clone, Serialize)]
pub struct AdditionalInfo {
    pub parsed_query: ParsedQuery,
}

/// The final structured output returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    /// Verdict or answer text.
    pub answer: String,
    /// Applicable conditions, in the order the model stated them.
    pub conditions: Vec<String>,
    /// Supporting clause excerpt.
    pub clause: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Explanation of the reasoning.
    pub rationale: String,
    /// Pages the evidence came from, ascending.
    pub page_references: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<AdditionalInfo>,
}

//! Pipeline error taxonomy.
//!
//! Stages with a documented fallback (embedding, query parsing, synthesis,
//! reranking) recover locally and rarely surface these variants. Stages
//! without one (fetch, extraction, size limits) propagate immediately and are
//! reported to the caller with the originating stage named.

use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage names used in caller-facing error reports and in the
/// document registry's `failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Retrieval,
    Synthesis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Retrieval => "retrieval",
            Stage::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to fetch document from {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("failed to extract text from document {key}: {message}")]
    ExtractionFailed { key: String, message: String },

    #[error("document {key} produced {chunks} chunks, exceeding the limit of {max}")]
    DocumentTooLarge { key: String, chunks: usize, max: usize },

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("no indexed evidence available for document {key}")]
    NoEvidenceAvailable { key: String },

    #[error("answer synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("vector index for document {key} is corrupt: {message}")]
    IndexCorrupt { key: String, message: String },
}

impl Error {
    /// The pipeline stage this error originated from.
    pub fn stage(&self) -> Stage {
        match self {
            Error::FetchFailed { .. } => Stage::Fetching,
            Error::ExtractionFailed { .. } => Stage::Extracting,
            Error::DocumentTooLarge { .. } => Stage::Chunking,
            Error::EmbeddingFailed(_) => Stage::Embedding,
            Error::IndexCorrupt { .. } => Stage::Indexing,
            Error::NoEvidenceAvailable { .. } => Stage::Retrieval,
            Error::SynthesisFailed(_) => Stage::Synthesis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_their_stage() {
        let error = Error::FetchFailed {
            url: "https://example.com/policy.pdf".to_string(),
            message: "404 Not Found".to_string(),
        };
        assert_eq!(error.stage(), Stage::Fetching);
        assert_eq!(error.stage().as_str(), "fetching");

        let error = Error::DocumentTooLarge {
            key: "doc".to_string(),
            chunks: 2000,
            max: 1000,
        };
        assert_eq!(error.stage(), Stage::Chunking);
    }
}

//! Semantic retrieval and reasoning over PDF documents.
//!
//! Point the engine at a document URL and ask questions in natural language:
//! the document is fetched, its text extracted with page boundaries, chunked,
//! embedded, and indexed once; each question is parsed into a structured
//! query, matched against the index, and answered with supporting clauses and
//! page references.

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod query;
pub mod retrieve;
pub mod synthesize;

pub use config::PipelineConfig;
pub use engine::{QueryEngine, document_key};
pub use error::{Error, Result};
pub use models::{AnswerResult, ParsedQuery, QueryIntent};

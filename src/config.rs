//! Startup configuration for the pipeline.
//!
//! Loaded once from an optional TOML file layered with `DOCQUERY_`-prefixed
//! environment variables, then treated as immutable for the process lifetime.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub fetch: FetchConfig,
    pub index: IndexConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            fetch: FetchConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `path` (if given) plus the environment.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("DOCQUERY").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk.
    pub max_tokens: usize,
    /// Fraction of `max_tokens` shared between consecutive chunks, in [0, 1).
    pub overlap_fraction: f32,
    /// Hard cap on chunks per document; exceeding it fails the build.
    pub max_chunks_per_document: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 200,
            overlap_fraction: 0.2,
            max_chunks_per_document: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Concurrent in-flight batches.
    pub concurrency: usize,
    /// Where the primary provider caches downloaded model files.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            concurrency: 4,
            cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("docquery")
                .join("models")
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned per query.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name resolved at startup: "openai", "gemini", or any
    /// OpenAI-compatible endpoint via `base_url`.
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    /// API key; falls back to the provider's conventional env var when unset.
    pub api_key: Option<String>,
    /// Override endpoint for OpenAI-compatible providers.
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 800,
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    /// Maximum document size in bytes.
    pub max_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Vector index backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// Exact in-memory index with JSON snapshot persistence.
    Memory,
    /// LanceDB-backed index.
    Lance,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Directory for index snapshots / the LanceDB dataset.
    pub data_dir: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            data_dir: None,
        }
    }
}

impl IndexConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("docquery")
                .join("index")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunking.max_tokens, 200);
        assert!(config.chunking.overlap_fraction < 1.0);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.index.backend, IndexBackend::Memory);
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docquery.toml");
        std::fs::write(
            &path,
            indoc::indoc! {r#"
                [chunking]
                max_tokens = 64
                overlap_fraction = 0.25

                [retrieval]
                top_k = 3

                [index]
                backend = "memory"
            "#},
        )
        .expect("write config");

        let config = PipelineConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.chunking.max_tokens, 64);
        assert_eq!(config.retrieval.top_k, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.embedding.batch_size, 32);
    }
}

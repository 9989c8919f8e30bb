//! Vector index backends and selection.
//!
//! An index instance holds one document's chunk vectors. All vectors within
//! an instance share one embedding strategy and dimension; `search` returns
//! top-k by cosine similarity, descending, ties broken by ascending chunk id.

pub mod lance;
pub mod memory;

use crate::config::{IndexBackend, IndexConfig};
use crate::error::{Error, Result};
use crate::models::{Chunk, ScoredChunk};
use async_trait::async_trait;
use std::path::PathBuf;

pub use lance::LanceIndex;
pub use memory::MemoryIndex;

/// Narrow index capability: add entries, search by vector.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embedding strategy the stored vectors came from, if any are stored.
    fn strategy(&self) -> Option<String>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize>;

    /// Insert chunk vectors produced by `strategy`. Incremental: appends to
    /// whatever is already stored.
    async fn add_batch(
        &mut self,
        entries: Vec<(Chunk, Vec<f32>)>,
        strategy: &str,
    ) -> Result<()>;

    /// Top-k nearest entries by cosine similarity, descending, ties broken by
    /// ascending chunk id. An empty index returns an empty result.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Flush state so it survives a process restart.
    async fn persist(&self) -> Result<()>;

    /// Drop all stored entries, resetting the strategy.
    async fn clear(&mut self) -> Result<()>;
}

/// Opens per-document index instances for the configured backend.
pub struct IndexStore {
    backend: IndexBackend,
    data_dir: PathBuf,
    connection: tokio::sync::OnceCell<lancedb::Connection>,
}

impl IndexStore {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            backend: config.backend,
            data_dir: config.data_dir(),
            connection: tokio::sync::OnceCell::new(),
        }
    }

    /// Whether a build for this key ran to completion. Persisted entries
    /// without a marker are leftovers from an interrupted build.
    pub fn is_complete(&self, doc_key: &str) -> bool {
        self.marker_path(doc_key).exists()
    }

    /// Record that a build for this key finished.
    pub fn mark_complete(&self, doc_key: &str) -> Result<()> {
        let corrupt = |message: String| Error::IndexCorrupt {
            key: doc_key.to_string(),
            message,
        };
        std::fs::create_dir_all(&self.data_dir).map_err(|e| corrupt(e.to_string()))?;
        std::fs::write(self.marker_path(doc_key), b"").map_err(|e| corrupt(e.to_string()))
    }

    /// Drop the completion marker for this key.
    pub fn clear_marker(&self, doc_key: &str) {
        let _ = std::fs::remove_file(self.marker_path(doc_key));
    }

    fn marker_path(&self, doc_key: &str) -> std::path::PathBuf {
        self.data_dir.join(format!("{doc_key}.complete"))
    }

    /// Open the index for a document key, restoring persisted state when a
    /// valid snapshot exists.
    pub async fn open(&self, doc_key: &str) -> Result<Box<dyn VectorIndex>> {
        match self.backend {
            IndexBackend::Memory => {
                let path = self.data_dir.join(format!("{doc_key}.index.json"));
                Ok(Box::new(MemoryIndex::open(path)))
            }
            IndexBackend::Lance => {
                let connection = self
                    .connection
                    .get_or_try_init(|| async {
                        lance::connect(&self.data_dir).await
                    })
                    .await?;
                let index = LanceIndex::open(connection, doc_key).await?;
                Ok(Box::new(index))
            }
        }
    }
}

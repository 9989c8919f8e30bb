//! Exact in-memory vector index with JSON snapshot persistence.
//!
//! Vectors are L2-normalized on insert so search is a dot product. Snapshots
//! are written per document key; an unreadable snapshot is discarded and the
//! document re-indexed rather than served from corrupt state.

use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{Chunk, ScoredChunk};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    strategy: String,
    dimension: usize,
    entries: Vec<Entry>,
}

pub struct MemoryIndex {
    path: PathBuf,
    strategy: Option<String>,
    dimension: Option<usize>,
    entries: Vec<Entry>,
}

impl MemoryIndex {
    /// Open the index at `path`, restoring a snapshot if one is readable.
    pub fn open(path: PathBuf) -> Self {
        let mut index = Self {
            path,
            strategy: None,
            dimension: None,
            entries: Vec::new(),
        };
        index.restore();
        index
    }

    fn restore(&mut self) {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => {
                tracing::info!(
                    path = %self.path.display(),
                    entries = snapshot.entries.len(),
                    strategy = %snapshot.strategy,
                    "restored index snapshot"
                );
                self.strategy = Some(snapshot.strategy);
                self.dimension = Some(snapshot.dimension);
                self.entries = snapshot.entries;
            }
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %error,
                    "index snapshot unreadable, discarding"
                );
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn strategy(&self) -> Option<String> {
        self.strategy.clone()
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    async fn add_batch(
        &mut self,
        entries: Vec<(Chunk, Vec<f32>)>,
        strategy: &str,
    ) -> Result<()> {
        for (chunk, vector) in entries {
            if let Some(existing) = &self.strategy {
                if existing != strategy {
                    return Err(Error::IndexCorrupt {
                        key: chunk.doc_key,
                        message: format!(
                            "cannot mix '{strategy}' vectors into a '{existing}' index"
                        ),
                    });
                }
            }
            if let Some(dimension) = self.dimension {
                if vector.len() != dimension {
                    return Err(Error::IndexCorrupt {
                        key: chunk.doc_key,
                        message: format!(
                            "vector dimension mismatch: expected {dimension}, got {}",
                            vector.len()
                        ),
                    });
                }
            }
            self.strategy.get_or_insert_with(|| strategy.to_string());
            self.dimension.get_or_insert(vector.len());
            self.entries.push(Entry {
                chunk,
                vector: Self::normalize(vector),
            });
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = Self::normalize(query.to_vec());
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                score: entry
                    .vector
                    .iter()
                    .zip(&query)
                    .map(|(a, b)| a * b)
                    .sum::<f32>()
                    .clamp(-1.0, 1.0),
                chunk: entry.chunk.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn persist(&self) -> Result<()> {
        let (Some(strategy), Some(dimension)) = (&self.strategy, self.dimension) else {
            return Ok(());
        };
        let snapshot = Snapshot {
            strategy: strategy.clone(),
            dimension,
            entries: self.entries.clone(),
        };

        let corrupt = |message: String| Error::IndexCorrupt {
            key: self
                .entries
                .first()
                .map(|e| e.chunk.doc_key.clone())
                .unwrap_or_default(),
            message,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| corrupt(e.to_string()))?;
        }
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| corrupt(e.to_string()))?;
        std::fs::write(&self.path, bytes).map_err(|e| corrupt(e.to_string()))?;
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.strategy = None;
        self.dimension = None;
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }
}

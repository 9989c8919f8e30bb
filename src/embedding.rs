//! Embedding generation: fastembed primary with a deterministic fallback.
//!
//! fastembed's TextEmbedding is not Send, so it sits behind an Arc and is
//! called through spawn_blocking from async contexts. The fallback is a
//! feature-hashing embedder that cannot fail, so a build never blocks on
//! embedding availability. Vectors from different strategies are never mixed
//! within one index; the gateway reports which strategy produced a batch and
//! the index records it.

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

/// Strategy label for the primary fastembed provider.
pub const STRATEGY_FASTEMBED: &str = "fastembed";
/// Strategy label for the hashing fallback.
pub const STRATEGY_HASHED: &str = "hashed";

/// Narrow embedding capability: texts in, same-length vectors out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable name recorded alongside indexes built from this provider.
    fn strategy(&self) -> &'static str;
    /// Output vector dimension, constant for the provider's lifetime.
    fn dimension(&self) -> usize;
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Local ONNX embedding model via fastembed.
pub struct FastembedProvider {
    model: Arc<fastembed::TextEmbedding>,
}

impl FastembedProvider {
    /// Default model dimension (BGE-small).
    pub const DIMENSION: usize = 384;

    /// Create the model, storing downloaded files in `cache_dir`.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        let options = fastembed::InitOptions::default()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(false);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;

        Ok(Self { model: Arc::new(model) })
    }
}

#[async_trait]
impl EmbeddingProvider for FastembedProvider {
    fn strategy(&self) -> &'static str {
        STRATEGY_FASTEMBED
    }

    fn dimension(&self) -> usize {
        Self::DIMENSION
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| Error::EmbeddingFailed(e.to_string()))
        })
        .await
        .map_err(|e| Error::EmbeddingFailed(format!("embedding task failed: {e}")))?
    }
}

/// Deterministic feature-hashing embedder.
///
/// Hashes word and character-trigram features into a fixed number of buckets
/// and L2-normalizes the result. Quality is far below a learned model, but it
/// is always available and similarity still tracks lexical overlap.
pub struct HashedEmbedder {
    dimension: usize,
}

impl HashedEmbedder {
    pub const DEFAULT_DIMENSION: usize = 384;

    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(8) }
    }

    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        (hasher.finish() % self.dimension as u64) as usize
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            vector[self.bucket(&word)] += 1.0;

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                vector[self.bucket(&trigram)] += 0.5;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedder {
    fn strategy(&self) -> &'static str {
        STRATEGY_HASHED
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// A batch of vectors plus the strategy that produced them.
pub struct EmbeddedBatch {
    pub vectors: Vec<Vec<f32>>,
    pub strategy: &'static str,
}

/// Batching, concurrency-limited front door for embedding.
///
/// One gateway instance is constructed at startup, owned by the orchestrator,
/// and shared for the process lifetime.
pub struct EmbeddingGateway {
    primary: Option<Arc<dyn EmbeddingProvider>>,
    fallback: Arc<HashedEmbedder>,
    batch_size: usize,
    concurrency: usize,
}

impl EmbeddingGateway {
    pub fn new(primary: Option<Arc<dyn EmbeddingProvider>>, config: &EmbeddingConfig) -> Self {
        Self {
            primary,
            fallback: Arc::new(HashedEmbedder::default()),
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Construct with the fastembed primary, degrading to fallback-only when
    /// the model cannot be initialized.
    pub fn with_fastembed(config: &EmbeddingConfig) -> Self {
        let primary: Option<Arc<dyn EmbeddingProvider>> =
            match FastembedProvider::new(&config.cache_dir()) {
                Ok(provider) => Some(Arc::new(provider)),
                Err(error) => {
                    tracing::warn!(%error, "fastembed unavailable, using hashed embeddings only");
                    None
                }
            };
        Self::new(primary, config)
    }

    /// Embed all `texts`, trying the primary strategy first and re-embedding
    /// everything with the fallback if any batch fails. Output order matches
    /// input order; all returned vectors come from a single strategy.
    pub async fn embed_all(&self, texts: Vec<String>) -> Result<EmbeddedBatch> {
        if let Some(primary) = &self.primary {
            match self.embed_with(primary.clone(), texts.clone()).await {
                Ok(vectors) => {
                    return Ok(EmbeddedBatch { vectors, strategy: primary.strategy() });
                }
                Err(error) => {
                    tracing::warn!(%error, "primary embedding failed, falling back");
                }
            }
        }

        let fallback: Arc<dyn EmbeddingProvider> = self.fallback.clone();
        let vectors = self.embed_with(fallback, texts).await?;
        Ok(EmbeddedBatch { vectors, strategy: STRATEGY_HASHED })
    }

    /// Embed a single query under a specific strategy, so query vectors match
    /// the strategy the target index was built with.
    pub async fn embed_query(&self, text: &str, strategy: &str) -> Result<Vec<f32>> {
        let provider = self.provider_for(strategy)?;
        let mut vectors = provider.embed(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingFailed("provider returned no vector".to_string()))
    }

    /// Vector dimension for a strategy.
    pub fn dimension_for(&self, strategy: &str) -> Result<usize> {
        Ok(self.provider_for(strategy)?.dimension())
    }

    fn provider_for(&self, strategy: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        if strategy == STRATEGY_HASHED {
            return Ok(self.fallback.clone());
        }
        match &self.primary {
            Some(primary) if primary.strategy() == strategy => Ok(primary.clone()),
            _ => Err(Error::EmbeddingFailed(format!(
                "no embedding provider for strategy '{strategy}'"
            ))),
        }
    }

    /// Split into batches and run them with bounded concurrency, recombining
    /// results in input order.
    async fn embed_with(
        &self,
        provider: Arc<dyn EmbeddingProvider>,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let batches: Vec<Vec<String>> = texts
            .chunks(self.batch_size)
            .map(|batch| batch.to_vec())
            .collect();

        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| {
                let provider = provider.clone();
                async move { provider.embed(batch).await }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let vectors: Vec<Vec<f32>> = results.into_iter().flatten().collect();
        if vectors.len() != expected {
            return Err(Error::EmbeddingFailed(format!(
                "expected {expected} vectors, got {}",
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

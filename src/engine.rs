//! Pipeline orchestration: document builds and query answering.
//!
//! Documents are keyed by a hash of their source URL and built at most once;
//! concurrent requests for the same unbuilt document serialize on a
//! per-document lock, so the second arrival finds the index already built.
//! Once indexed, the index is shared read-only and queries run without the
//! lock. A build that fails records the failing stage and is retried on the
//! next query.

use crate::chunk::chunk_text;
use crate::config::PipelineConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::Result;
use crate::extract;
use crate::fetch::DocumentFetcher;
use crate::index::{IndexStore, VectorIndex};
use crate::llm::LlmClient;
use crate::models::{AdditionalInfo, AnswerResult, Document, DocumentStatus};
use crate::prompts::PromptEngine;
use crate::query::QueryParser;
use crate::retrieve::Retriever;
use crate::synthesize::Synthesizer;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Stable document key: hex SHA-256 of the source URL.
pub fn document_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

struct DocumentRecord {
    document: Document,
    index: Option<Arc<dyn VectorIndex>>,
}

/// Caller-facing view of one tracked document.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentSummary {
    pub key: String,
    pub url: String,
    pub status: String,
    pub chunk_count: usize,
    pub indexed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Aggregate counters over the document registry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStats {
    pub documents: usize,
    pub indexed: usize,
    pub failed: usize,
    pub total_chunks: usize,
}

pub struct QueryEngine {
    config: PipelineConfig,
    fetcher: Arc<dyn DocumentFetcher>,
    gateway: Arc<EmbeddingGateway>,
    index_store: IndexStore,
    parser: QueryParser,
    retriever: Retriever,
    synthesizer: Synthesizer,
    registry: Mutex<HashMap<String, Arc<tokio::sync::Mutex<DocumentRecord>>>>,
}

impl QueryEngine {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn DocumentFetcher>,
        gateway: Arc<EmbeddingGateway>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        let prompts = Arc::new(PromptEngine::new());
        let index_store = IndexStore::new(&config.index);
        let retriever = Retriever::new(gateway.clone(), config.retrieval.top_k);
        Self {
            parser: QueryParser::new(llm.clone(), prompts.clone()),
            synthesizer: Synthesizer::new(llm, prompts),
            retriever,
            index_store,
            config,
            fetcher,
            gateway,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Answer one question against the document at `url`, building its index
    /// first if this is the first time the document is seen.
    pub async fn answer(&self, url: &str, query: &str) -> Result<AnswerResult> {
        let record = self.record_for(url);

        // The record lock covers only the build; the built index is immutable,
        // so the query phase runs on a shared handle without serializing
        // concurrent readers.
        let (key, index) = {
            let mut guard = record.lock().await;
            self.ensure_indexed(&mut guard).await?;
            let index = guard.index.clone().ok_or_else(|| {
                crate::error::Error::NoEvidenceAvailable {
                    key: guard.document.key.clone(),
                }
            })?;
            (guard.document.key.clone(), index)
        };

        let parsed = self.parser.parse(query).await;
        let evidence = self.retriever.retrieve(index.as_ref(), &parsed, &key).await?;

        let mut answer = self.synthesizer.synthesize(&parsed, &evidence).await;
        answer.additional_info = Some(AdditionalInfo { parsed_query: parsed });
        Ok(answer)
    }

    /// Answer a batch of questions against one document, building its index
    /// at most once.
    pub async fn answer_batch(&self, url: &str, queries: &[String]) -> Result<Vec<AnswerResult>> {
        let mut answers = Vec::with_capacity(queries.len());
        for query in queries {
            answers.push(self.answer(url, query).await?);
        }
        Ok(answers)
    }

    /// Summaries of every document the engine has seen, in key order.
    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        let records: Vec<Arc<tokio::sync::Mutex<DocumentRecord>>> = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.values().cloned().collect()
        };

        let mut summaries = Vec::with_capacity(records.len());
        for record in records {
            let guard = record.lock().await;
            summaries.push(DocumentSummary {
                key: guard.document.key.clone(),
                url: guard.document.url.clone(),
                status: guard.document.status.to_string(),
                chunk_count: guard.document.chunk_count,
                indexed_at: guard.document.indexed_at,
            });
        }
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    /// Aggregate counters over the registry.
    pub async fn stats(&self) -> PipelineStats {
        let documents = self.list_documents().await;
        PipelineStats {
            documents: documents.len(),
            indexed: documents.iter().filter(|d| d.status == "indexed").count(),
            failed: documents.iter().filter(|d| d.status.starts_with("failed")).count(),
            total_chunks: documents.iter().map(|d| d.chunk_count).sum(),
        }
    }

    fn record_for(&self, url: &str) -> Arc<tokio::sync::Mutex<DocumentRecord>> {
        let key = document_key(url);
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(DocumentRecord {
                    document: Document::new(key, url.to_string()),
                    index: None,
                }))
            })
            .clone()
    }

    /// Make sure the record has a populated index, building it if needed.
    /// Holding the record lock across the build gives at-most-one build per
    /// document key.
    async fn ensure_indexed(&self, record: &mut DocumentRecord) -> Result<()> {
        if record.index.is_some() && record.document.status == DocumentStatus::Indexed {
            return Ok(());
        }

        let key = record.document.key.clone();
        let mut index = self.index_store.open(&key).await?;

        // A persisted index from an earlier process serves without a rebuild,
        // but only when its build finished (completion marker) and its
        // embedding strategy can still produce query vectors. Anything else
        // is cleared and rebuilt from the source.
        if let Some(strategy) = index.strategy() {
            if !self.index_store.is_complete(&key) {
                tracing::warn!(key, "persisted index has no completion marker, rebuilding");
                index.clear().await?;
            } else if self.gateway.dimension_for(&strategy).is_err() {
                tracing::warn!(
                    key,
                    strategy,
                    "persisted index strategy unavailable, rebuilding"
                );
                index.clear().await?;
            } else {
                let count = index.count().await?;
                if count > 0 {
                    tracing::info!(key, chunks = count, "restored persisted index");
                    record.document.status = DocumentStatus::Indexed;
                    record.document.chunk_count = count;
                    record.document.indexed_at.get_or_insert_with(chrono::Utc::now);
                    record.index = Some(Arc::from(index));
                    return Ok(());
                }
            }
        }

        match self.build(record, index).await {
            Ok(()) => Ok(()),
            Err(error) => {
                let stage = error.stage();
                tracing::error!(key, %error, stage = %stage, "document build failed");
                record.document.status = DocumentStatus::Failed(stage);
                record.index = None;
                Err(error)
            }
        }
    }

    async fn build(
        &self,
        record: &mut DocumentRecord,
        mut index: Box<dyn VectorIndex>,
    ) -> Result<()> {
        let key = record.document.key.clone();
        let url = record.document.url.clone();
        let started = Instant::now();

        // Invalidate any stale completion marker before mutating the index,
        // so an interrupted build is rebuilt wholesale rather than restored.
        self.index_store.clear_marker(&key);

        record.document.status = DocumentStatus::Fetching;
        let stage = Instant::now();
        let bytes = self.fetcher.fetch(&url).await?;
        tracing::info!(key, elapsed_ms = stage.elapsed().as_millis() as u64, "fetch complete");

        record.document.status = DocumentStatus::Extracting;
        let stage = Instant::now();
        let extracted = extract::extract(&bytes, &key)?;
        record.document.text = extracted.text;
        record.document.pages = extracted.pages;
        tracing::info!(key, elapsed_ms = stage.elapsed().as_millis() as u64, "extraction complete");

        record.document.status = DocumentStatus::Chunking;
        let chunks = chunk_text(
            &record.document.text,
            &record.document.pages,
            &self.config.chunking,
            &key,
        )?;
        record.document.chunk_count = chunks.len();

        record.document.status = DocumentStatus::Embedding;
        let stage = Instant::now();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch = self.gateway.embed_all(texts).await?;
        tracing::info!(
            key,
            vectors = batch.vectors.len(),
            strategy = batch.strategy,
            elapsed_ms = stage.elapsed().as_millis() as u64,
            "embedding complete"
        );

        // A leftover index under a different strategy cannot absorb these
        // vectors; rebuild it from empty.
        if index.strategy().is_some_and(|s| s != batch.strategy) {
            index.clear().await?;
        }
        let entries: Vec<_> = chunks.into_iter().zip(batch.vectors).collect();
        index.add_batch(entries, batch.strategy).await?;
        index.persist().await?;
        self.index_store.mark_complete(&key)?;

        record.document.status = DocumentStatus::Indexed;
        record.document.indexed_at = Some(chrono::Utc::now());
        record.index = Some(Arc::from(index));
        tracing::info!(
            key,
            chunks = record.document.chunk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document indexed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexBackend;
    use crate::error::{Error, Stage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentFetcher for FailingFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::FetchFailed {
                url: url.to_string(),
                message: "HTTP status 404 Not Found".to_string(),
            })
        }
    }

    struct GarbageFetcher;

    #[async_trait]
    impl DocumentFetcher for GarbageFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(b"this is not a pdf".to_vec())
        }
    }

    fn engine(fetcher: Arc<dyn DocumentFetcher>, data_dir: &std::path::Path) -> QueryEngine {
        let mut config = PipelineConfig::default();
        config.index.backend = IndexBackend::Memory;
        config.index.data_dir = Some(data_dir.to_path_buf());
        let gateway = Arc::new(EmbeddingGateway::new(None, &config.embedding));
        QueryEngine::new(config, fetcher, gateway, None)
    }

    #[test]
    fn document_keys_are_stable_and_distinct() {
        let a = document_key("https://example.com/a.pdf");
        assert_eq!(a, document_key("https://example.com/a.pdf"));
        assert_ne!(a, document_key("https://example.com/b.pdf"));
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn fetch_failure_marks_document_failed_at_fetching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FailingFetcher { calls: AtomicUsize::new(0) });
        let engine = engine(fetcher.clone(), dir.path());

        let error = engine
            .answer("https://example.com/missing.pdf", "Does this cover knee surgery?")
            .await
            .unwrap_err();
        assert_eq!(error.stage(), Stage::Fetching);

        let documents = engine.list_documents().await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].status, "failed (fetching)");

        // A failed build is retried on the next query.
        let _ = engine
            .answer("https://example.com/missing.pdf", "Second attempt")
            .await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unparseable_bytes_fail_at_extracting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(Arc::new(GarbageFetcher), dir.path());

        let error = engine
            .answer("https://example.com/garbage.pdf", "anything")
            .await
            .unwrap_err();
        assert_eq!(error.stage(), Stage::Extracting);

        let stats = engine.stats().await;
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.indexed, 0);
    }
}

//! End-to-end pipeline tests against an in-memory document source.
//!
//! A minimal single-page PDF is generated at runtime so the real extraction
//! path runs without fixtures or network access. No language model is
//! configured, so answers take the extractive path with fixed low confidence.

use async_trait::async_trait;
use docquery::config::{IndexBackend, PipelineConfig};
use docquery::embedding::EmbeddingGateway;
use docquery::engine::{QueryEngine, document_key};
use docquery::error::{Error, Result, Stage};
use docquery::fetch::DocumentFetcher;
use docquery::llm::{CompletionError, LlmClient};
use docquery::models::QueryIntent;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Build a one-page PDF containing `lines` as Helvetica text, with a correct
/// cross-reference table.
fn minimal_pdf(lines: &[&str]) -> Vec<u8> {
    let mut content = String::from("BT\n/F1 12 Tf\n72 720 Td\n");
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            content.push_str("0 -16 Td\n");
        }
        let escaped = line.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
        content.push_str(&format!("({escaped}) Tj\n"));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{content}endstream", content.len()),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }

    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    pdf
}

struct CountingFetcher {
    bytes: Vec<u8>,
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn new(bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self { bytes, calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bytes.clone())
    }
}

struct NotFoundFetcher;

#[async_trait]
impl DocumentFetcher for NotFoundFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        Err(Error::FetchFailed {
            url: url.to_string(),
            message: "HTTP status 404 Not Found".to_string(),
        })
    }
}

fn policy_pdf() -> Vec<u8> {
    minimal_pdf(&[
        "Section 1. Knee surgery is covered subject to pre-approval by the insurer.",
        "Section 2. A waiting period of 90 days applies to all orthopedic procedures.",
        "Section 3. Quarterly parking garage maintenance schedules are posted in the lobby.",
        "Section 4. Dental cleanings are covered twice per calendar year.",
    ])
}

fn test_config(data_dir: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.index.backend = IndexBackend::Memory;
    config.index.data_dir = Some(data_dir.to_path_buf());
    // Small windows so the one-page document yields several chunks.
    config.chunking.max_tokens = 15;
    config.chunking.overlap_fraction = 0.2;
    config.retrieval.top_k = 2;
    config
}

fn test_engine(config: PipelineConfig, fetcher: Arc<dyn DocumentFetcher>) -> QueryEngine {
    let gateway = Arc::new(EmbeddingGateway::new(None, &config.embedding));
    QueryEngine::new(config, fetcher, gateway, None)
}

#[tokio::test]
async fn answers_question_with_extractive_fallback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = CountingFetcher::new(policy_pdf());
    let engine = test_engine(test_config(dir.path()), fetcher.clone());

    let answer = engine
        .answer("https://example.com/policy.pdf", "Does this policy cover knee surgery?")
        .await
        .expect("answer");

    // No LLM configured: extractive answer with fixed low confidence.
    assert!(answer.answer.starts_with("Unable to determine"));
    assert!((answer.confidence - 0.3).abs() < 1e-6);
    assert!(answer.clause.to_lowercase().contains("knee surgery"));
    assert_eq!(answer.page_references, vec![1]);

    let info = answer.additional_info.expect("parsed query attached");
    assert_eq!(info.parsed_query.intent, QueryIntent::Coverage);
    assert!(info.parsed_query.keywords.contains(&"knee".to_string()));
}

#[tokio::test]
async fn document_is_fetched_and_indexed_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = CountingFetcher::new(policy_pdf());
    let engine = test_engine(test_config(dir.path()), fetcher.clone());
    let url = "https://example.com/policy.pdf";

    engine.answer(url, "Does this cover knee surgery?").await.expect("first answer");
    engine.answer(url, "Are dental cleanings covered?").await.expect("second answer");
    assert_eq!(fetcher.calls(), 1);

    let documents = engine.list_documents().await;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].status, "indexed");
    assert!(documents[0].chunk_count > 1);
    assert!(documents[0].indexed_at.is_some());
}

#[tokio::test]
async fn persisted_index_survives_engine_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://example.com/policy.pdf";

    let fetcher = CountingFetcher::new(policy_pdf());
    let engine = test_engine(test_config(dir.path()), fetcher.clone());
    engine.answer(url, "Does this cover knee surgery?").await.expect("build");
    assert_eq!(fetcher.calls(), 1);
    drop(engine);

    // A new engine over the same data directory restores the snapshot and
    // never touches the source.
    let cold_fetcher = CountingFetcher::new(Vec::new());
    let engine = test_engine(test_config(dir.path()), cold_fetcher.clone());
    let answer = engine
        .answer(url, "Does this cover knee surgery?")
        .await
        .expect("answer from restored index");
    assert_eq!(cold_fetcher.calls(), 0);
    assert!(answer.clause.to_lowercase().contains("knee"));
}

#[tokio::test]
async fn batch_builds_once_and_answers_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = CountingFetcher::new(policy_pdf());
    let engine = test_engine(test_config(dir.path()), fetcher.clone());

    let queries = vec![
        "Does this cover knee surgery?".to_string(),
        "What is the waiting period?".to_string(),
    ];
    let answers = engine
        .answer_batch("https://example.com/policy.pdf", &queries)
        .await
        .expect("batch answers");

    assert_eq!(answers.len(), 2);
    assert_eq!(fetcher.calls(), 1);

    let first = answers[0].additional_info.as_ref().expect("parsed query");
    assert_eq!(first.parsed_query.original_query, queries[0]);
    assert_eq!(first.parsed_query.intent, QueryIntent::Coverage);
    let second = answers[1].additional_info.as_ref().expect("parsed query");
    assert_eq!(second.parsed_query.original_query, queries[1]);
}

/// Write a memory-backend snapshot for `key` as if a previous process had
/// indexed the document under `strategy`.
fn write_snapshot(data_dir: &std::path::Path, key: &str, strategy: &str) {
    let snapshot = serde_json::json!({
        "strategy": strategy,
        "dimension": 384,
        "entries": [{
            "chunk": {
                "id": 0,
                "doc_key": key,
                "text": "stale indexed text",
                "token_count": 3,
                "pages": [1],
                "start": 0,
                "end": 18,
            },
            "vector": vec![1.0f32; 384],
        }],
    });
    std::fs::create_dir_all(data_dir).expect("create data dir");
    std::fs::write(data_dir.join(format!("{key}.index.json")), snapshot.to_string())
        .expect("write snapshot");
}

#[tokio::test]
async fn snapshot_with_unavailable_strategy_is_rebuilt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://example.com/policy.pdf";
    let key = document_key(url);

    // Snapshot built under a strategy this process has no provider for; the
    // gateway here is fallback-only, so fastembed query vectors are
    // unobtainable and the stored index must not be served.
    write_snapshot(dir.path(), &key, "fastembed");
    std::fs::write(dir.path().join(format!("{key}.complete")), b"").expect("write marker");

    let fetcher = CountingFetcher::new(policy_pdf());
    let engine = test_engine(test_config(dir.path()), fetcher.clone());

    let answer = engine
        .answer(url, "Does this cover knee surgery?")
        .await
        .expect("rebuild and answer");
    assert_eq!(fetcher.calls(), 1);
    assert!(answer.clause.to_lowercase().contains("knee"));

    let documents = engine.list_documents().await;
    assert_eq!(documents[0].status, "indexed");
}

#[tokio::test]
async fn snapshot_without_completion_marker_is_rebuilt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://example.com/policy.pdf";
    let key = document_key(url);

    // Entries persisted by an interrupted build: no completion marker.
    write_snapshot(dir.path(), &key, "hashed");

    let fetcher = CountingFetcher::new(policy_pdf());
    let engine = test_engine(test_config(dir.path()), fetcher.clone());

    let answer = engine
        .answer(url, "Does this cover knee surgery?")
        .await
        .expect("rebuild and answer");
    assert_eq!(fetcher.calls(), 1);
    assert!(answer.clause.to_lowercase().contains("knee"));
    assert!(dir.path().join(format!("{key}.complete")).exists());
}

/// Synthesis calls rendezvous on a barrier; parse calls fail over to the
/// heuristic parser.
struct RendezvousLlm {
    barrier: tokio::sync::Barrier,
}

#[async_trait]
impl LlmClient for RendezvousLlm {
    async fn complete(&self, system: &str, _user: &str) -> std::result::Result<String, CompletionError> {
        if system.contains("query parser") {
            return Err(CompletionError("parser offline".to_string()));
        }
        self.barrier.wait().await;
        Ok(r#"{"answer": "Yes.", "conditions": [], "clause": "c", "confidence": 0.9, "rationale": "r"}"#
            .to_string())
    }
}

#[tokio::test]
async fn indexed_document_serves_queries_concurrently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = CountingFetcher::new(policy_pdf());
    let config = test_config(dir.path());
    let gateway = Arc::new(EmbeddingGateway::new(None, &config.embedding));
    let llm: Arc<dyn LlmClient> = Arc::new(RendezvousLlm {
        barrier: tokio::sync::Barrier::new(2),
    });
    let engine = Arc::new(QueryEngine::new(config, fetcher, gateway, Some(llm)));
    let url = "https://example.com/policy.pdf";

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.answer(url, "Does this cover knee surgery?").await }
    });
    let second = tokio::spawn({
        let engine = engine.clone();
        async move { engine.answer(url, "Are dental cleanings covered?").await }
    });

    // Both synthesis calls must be in flight at the same time to release the
    // barrier; a pipeline that serialized the query phase would never get
    // there.
    let (first, second) = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        (first.await, second.await)
    })
    .await
    .expect("concurrent queries stalled");

    assert_eq!(first.expect("join").expect("first answer").answer, "Yes.");
    assert_eq!(second.expect("join").expect("second answer").answer, "Yes.");
}

#[tokio::test]
async fn missing_document_reports_fetch_stage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = test_engine(test_config(dir.path()), Arc::new(NotFoundFetcher));

    let error = engine
        .answer("https://example.com/missing.pdf", "anything")
        .await
        .expect_err("fetch should fail");
    assert_eq!(error.stage(), Stage::Fetching);
    assert!(error.to_string().contains("404"));

    let stats = engine.stats().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.indexed, 0);
}

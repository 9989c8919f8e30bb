use anyhow::Context;
use clap::Parser;
use docquery::config::PipelineConfig;
use docquery::embedding::EmbeddingGateway;
use docquery::engine::QueryEngine;
use docquery::fetch::HttpFetcher;
use docquery::llm::{LlmClient, RigLlmClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Ask natural-language questions about a PDF document.
#[derive(Debug, Parser)]
#[command(name = "docquery", version, about)]
struct Cli {
    /// URL of the PDF document to analyze.
    #[arg(long)]
    document_url: String,

    /// Question to ask; repeat for a batch.
    #[arg(long = "query", required = true)]
    queries: Vec<String>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docquery=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let gateway = Arc::new(EmbeddingGateway::with_fastembed(&config.embedding));
    let llm: Option<Arc<dyn LlmClient>> = match RigLlmClient::new(&config.llm) {
        Ok(client) => Some(Arc::new(client)),
        Err(error) => {
            tracing::warn!(%error, "no language model available, using extractive answers");
            None
        }
    };

    let engine = QueryEngine::new(config, fetcher, gateway, llm);
    let answers = engine.answer_batch(&cli.document_url, &cli.queries).await?;

    let output = if answers.len() == 1 {
        serde_json::to_string_pretty(&answers[0])?
    } else {
        serde_json::to_string_pretty(&answers)?
    };
    println!("{output}");
    Ok(())
}

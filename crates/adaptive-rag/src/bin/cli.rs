// Adaptive RAG command-line front end: one question in, one JSON result out.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use adaptive_rag::{KnowledgeBase, OpenAiCompatibleClient, Orchestrator, RagConfig};

#[derive(Parser)]
#[command(name = "adaptive-rag-cli")]
#[command(version, about = "Ask the adaptive RAG pipeline a guideline question")]
struct Cli {
    /// JSON config file; defaults are used for missing fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override pipeline.top_k
    #[arg(long)]
    top_k: Option<usize>,

    /// Override pipeline.max_retries
    #[arg(long)]
    max_retries: Option<u32>,

    /// The question to answer
    #[arg(required = true)]
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RagConfig::from_file(path).map_err(|e| anyhow!(e))?,
        None => RagConfig::default(),
    };
    config.apply_env();
    if let Some(top_k) = cli.top_k {
        config.pipeline.top_k = top_k;
    }
    if let Some(max_retries) = cli.max_retries {
        config.pipeline.max_retries = max_retries;
    }
    config.validate().map_err(|e| anyhow!(e))?;

    let kb = Arc::new(
        KnowledgeBase::open(&config)
            .await
            .context("Failed to open knowledge base")?,
    );
    let llm = Arc::new(OpenAiCompatibleClient::new(&config.llm)?);
    let orchestrator = Orchestrator::new(kb, llm);

    let query = cli.query.join(" ");
    let result = orchestrator.process(&query, &config.pipeline).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

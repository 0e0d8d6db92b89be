//! Offline evaluation over a labelled JSONL question set

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use legal_rag::rag::{format_report, load_dataset, run_pipeline_eval, run_retrieval_eval};
use legal_rag::{LegalRagPipeline, PipelineConfig};

/// Legal RAG evaluation
#[derive(Parser, Debug)]
#[command(name = "legal-rag-eval")]
#[command(about = "Measure article recall, MRR and hallucination rate", long_about = None)]
struct Args {
    /// JSONL file with `question` and `expected_articles` per line
    #[arg(long, default_value = "eval/eval_dataset.jsonl")]
    dataset: PathBuf,

    /// Where to write the JSON results
    #[arg(long, default_value = "eval/results/eval_results.json")]
    output: PathBuf,

    /// Search with the raw question only, skipping the LLM stages
    #[arg(long)]
    retrieval_only: bool,

    /// Questions evaluated concurrently
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = PipelineConfig::load().context("Failed to load pipeline config")?;
    let pipeline = LegalRagPipeline::from_config(config).context("Failed to build pipeline")?;
    let questions = load_dataset(&args.dataset)?;

    tracing::info!(
        questions = questions.len(),
        retrieval_only = args.retrieval_only,
        concurrency = args.concurrency,
        "Starting evaluation"
    );
    let summary = if args.retrieval_only {
        run_retrieval_eval(&pipeline, &questions, args.concurrency).await
    } else {
        run_pipeline_eval(&pipeline, &questions, args.concurrency).await
    };

    if let Some(dir) = args.output.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(&summary).context("Failed to serialize results")?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!("{}", format_report(&summary));
    println!("Results saved to: {}", args.output.display());
    Ok(())
}

//! Legal RAG HTTP server
//!
//! Serves the pipeline behind an OpenAI-compatible chat completions endpoint
//! so chat front-ends can use it as a model named `legal_rag`.

mod api;

use anyhow::{Context, Result};
use std::sync::Arc;

use legal_rag::{LegalRagPipeline, PipelineConfig, QdrantStore};

const DEFAULT_BIND: &str = "127.0.0.1:9099";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = PipelineConfig::load().context("Failed to load pipeline config")?;
    probe_index(&config).await;

    let pipeline = LegalRagPipeline::from_config(config).context("Failed to build pipeline")?;
    let state = api::AppState {
        pipeline: Arc::new(pipeline),
        api_key: std::env::var("LEGAL_RAG_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty()),
    };
    if state.api_key.is_none() {
        tracing::warn!("LEGAL_RAG_API_KEY is not set, endpoint is unauthenticated");
    }

    let addr = std::env::var("LEGAL_RAG_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Legal RAG API listening on http://{}", addr);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Log whether the statute collection is reachable; the server starts either way.
async fn probe_index(config: &PipelineConfig) {
    let store = match QdrantStore::from_config(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(error = %e, "Vector index client not configured");
            return;
        }
    };
    match store.count().await {
        Ok(points) => tracing::info!(collection = %store.collection(), points, "Vector index reachable"),
        Err(e) => tracing::warn!(collection = %store.collection(), error = %e, "Vector index unreachable"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

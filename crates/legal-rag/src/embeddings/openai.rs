//! OpenAI-compatible `/embeddings` client

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::Embedder;
use crate::config::{EmbeddingConfig, PipelineConfig, RetryPolicy};
use crate::error::ClientError;
use crate::http;
use crate::retry::with_retry;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiEmbedder {
    model: String,
    dimension: usize,
    api_key: String,
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if base_url == DEFAULT_BASE_URL && config.api_key.trim().is_empty() {
            return Err(ClientError::NotConfigured(
                "embedding API key is not set".to_string(),
            ));
        }

        tracing::info!(
            model = %config.model,
            dimension = config.dimension,
            base_url = %base_url,
            "Creating OpenAiEmbedder"
        );

        Ok(Self {
            model: config.model.clone(),
            dimension: config.dimension,
            api_key: config.api_key.clone(),
            base_url,
            client: http::build_client(request_timeout)?,
            retry,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ClientError> {
        Self::new(&config.embedding, config.retry.clone(), config.request_timeout())
    }

    async fn send_once(&self, endpoint: &str, request: &serde_json::Value) -> Result<Vec<f32>, ClientError> {
        let mut builder = self.client.post(endpoint).json(request);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(endpoint, e))?;

        let result: EmbeddingResponse = http::read_json(response, endpoint).await?;
        Self::extract_vector(result, endpoint, self.dimension)
    }

    fn extract_vector(
        result: EmbeddingResponse,
        endpoint: &str,
        expected_dimension: usize,
    ) -> Result<Vec<f32>, ClientError> {
        let data = result
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .ok_or_else(|| ClientError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: "No embedding returned".to_string(),
            })?;

        if data.embedding.len() != expected_dimension {
            return Err(ClientError::DimensionMismatch {
                expected: expected_dimension,
                actual: data.embedding.len(),
            });
        }
        Ok(data.embedding)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError> {
        let endpoint = http::join_url(&self.base_url, "embeddings");
        let request = json!({
            "model": self.model,
            "input": text,
        });

        let vector = with_retry(&self.retry, "embedding", || {
            self.send_once(&endpoint, &request)
        })
        .await?;

        tracing::debug!(model = %self.model, dimension = vector.len(), "Query embedded");
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

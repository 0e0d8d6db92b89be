//! OpenAI-compatible chat-completions provider
//! Works against OpenAI, OpenRouter, Together, Ollama and compatible proxies

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ApiProvider, ChatMessage, Completer, GenerationConfig, ProviderInfo};
use crate::config::{CompletionConfig, PipelineConfig, RetryPolicy};
use crate::error::ClientError;
use crate::http;
use crate::retry::with_retry;

/// Chat-completions client with adapter-level retry
pub struct OpenAiCompleter {
    provider: ApiProvider,
    api_key: String,
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl OpenAiCompleter {
    pub fn new(
        config: &CompletionConfig,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        if config.provider.requires_api_key() && config.api_key.trim().is_empty() {
            return Err(ClientError::NotConfigured(format!(
                "{} API key is not set",
                config.provider.name()
            )));
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.provider.default_base_url().to_string());
        let client = http::build_client(request_timeout)?;

        tracing::info!(
            provider = config.provider.name(),
            base_url = %base_url,
            timeout_s = request_timeout.as_secs(),
            "Creating OpenAiCompleter"
        );

        Ok(Self {
            provider: config.provider.clone(),
            api_key: config.api_key.clone(),
            base_url,
            client,
            retry,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ClientError> {
        Self::new(&config.completion, config.retry.clone(), config.request_timeout())
    }

    fn endpoint(&self) -> String {
        http::join_url(&self.base_url, "chat/completions")
    }

    fn build_request(messages: &[ChatMessage], options: &GenerationConfig) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        json!({
            "model": options.model,
            "messages": messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "top_p": options.top_p,
            "stream": false
        })
    }

    async fn send_once(&self, endpoint: &str, request: &serde_json::Value) -> Result<String, ClientError> {
        let mut builder = self.client.post(endpoint).json(request);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(endpoint, e))?;

        let result: OpenAIResponse = http::read_json(response, endpoint).await?;
        Self::extract_content(result, endpoint)
    }

    fn extract_content(result: OpenAIResponse, endpoint: &str) -> Result<String, ClientError> {
        let choice = result.choices.into_iter().next().ok_or_else(|| {
            ClientError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: "No choices returned from API".to_string(),
            }
        })?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationConfig,
    ) -> Result<String, ClientError> {
        let endpoint = self.endpoint();
        let request = Self::build_request(messages, options);

        tracing::debug!(
            endpoint = %endpoint,
            model = %options.model,
            max_tokens = options.max_tokens,
            prompt_chars = messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "Sending chat completion request"
        );

        let content = with_retry(&self.retry, "chat_completion", || {
            self.send_once(&endpoint, &request)
        })
        .await?;

        tracing::debug!(model = %options.model, chars = content.len(), "Completion received");
        Ok(content)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.provider.name().to_string(),
            endpoint: self.endpoint(),
        }
    }
}

/// Response structures
#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

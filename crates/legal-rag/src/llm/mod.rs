//! LLM Module - completion capability used by the pipeline stages
//! Remote chat-completion providers behind a single trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub mod openai;

pub use openai::OpenAiCompleter;

/// External API providers speaking the OpenAI chat-completions protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApiProvider {
    OpenAI,
    OpenRouter,
    Together,
    Ollama,
    Custom { base_url: String },
}

impl ApiProvider {
    pub fn default_base_url(&self) -> &str {
        match self {
            ApiProvider::OpenAI => "https://api.openai.com/v1",
            ApiProvider::OpenRouter => "https://openrouter.ai/api/v1",
            ApiProvider::Together => "https://api.together.xyz/v1",
            ApiProvider::Ollama => "http://localhost:11434/v1",
            ApiProvider::Custom { base_url } => base_url,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ApiProvider::OpenAI => "OpenAI",
            ApiProvider::OpenRouter => "OpenRouter",
            ApiProvider::Together => "Together",
            ApiProvider::Ollama => "Ollama",
            ApiProvider::Custom { .. } => "Custom",
        }
    }

    /// Local servers accept requests without a key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ApiProvider::Ollama)
    }
}

/// Core trait for completion providers
#[async_trait]
pub trait Completer: Send + Sync {
    /// Run one chat completion and return the assistant text
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationConfig,
    ) -> Result<String, ClientError>;

    /// Get provider info
    fn info(&self) -> ProviderInfo;
}

/// Per-call generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl GenerationConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 1024,
            temperature: 0.0,
            top_p: 1.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A chat message with role and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: String,
}

/// Message content as OpenAI-compatible clients send it: a string, `null`,
/// or an array of typed parts.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Text parts are joined with newlines; image and other parts are dropped.
fn deserialize_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<WireContent>::deserialize(deserializer)? {
        Some(WireContent::Text(text)) => text,
        Some(WireContent::Parts(parts)) => parts
            .into_iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    })
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub endpoint: String,
}

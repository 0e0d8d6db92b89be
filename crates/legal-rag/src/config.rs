use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::ApiProvider;

/// Process-wide pipeline configuration.
///
/// Built once at startup and handed to [`crate::LegalRagPipeline::new`];
/// stages never read the environment themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retrieval: RetrievalConfig,
    pub models: StageModels,
    pub expansion: ExpansionConfig,
    pub rewrite: RewriteConfig,
    pub generation: GenerationPolicy,
    pub limits: InputLimits,
    /// Per-stage time budget
    pub timeout_seconds: u64,
    /// Per-request HTTP timeout; unset splits the stage budget across retry attempts
    pub request_timeout_seconds: Option<u64>,
    pub completion: CompletionConfig,
    pub embedding: EmbeddingConfig,
    pub vector_index: VectorIndexConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    /// Restrict search to these `codex_id` values (empty = all codes)
    pub code_filter: Vec<String>,
}

/// Completion model used by each LLM stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageModels {
    pub expansion: String,
    pub rewrite: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub max_terms: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Number of earlier chat messages shown to the rewriter
    pub history_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationPolicy {
    /// Extra attempts when the answer cites articles missing from the context
    pub max_regenerations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    pub max_query_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub provider: ApiProvider,
    pub api_key: String,
    /// Overrides the provider's default base URL (e.g. a proxy)
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

/// Bounded exponential backoff applied inside the client adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 7,
            score_threshold: 0.3,
            code_filter: Vec::new(),
        }
    }
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            expansion: "gpt-4o-mini".to_string(),
            rewrite: "gpt-4o-mini".to_string(),
            answer: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self { max_terms: 10 }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self { history_window: 6 }
    }
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_regenerations: 1,
        }
    }
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_query_chars: 4000,
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: ApiProvider::OpenAI,
            api_key: String::new(),
            base_url: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key: String::new(),
            base_url: None,
        }
    }
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "russian_law".to_string(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            models: StageModels::default(),
            expansion: ExpansionConfig::default(),
            rewrite: RewriteConfig::default(),
            generation: GenerationPolicy::default(),
            limits: InputLimits::default(),
            timeout_seconds: 30,
            request_timeout_seconds: None,
            completion: CompletionConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_index: VectorIndexConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be > 0");
        }
        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            bail!("retrieval.score_threshold must be in [0.0, 1.0]");
        }
        if self.timeout_seconds == 0 {
            bail!("timeout_seconds must be > 0");
        }
        if let Some(secs) = self.request_timeout_seconds {
            if secs == 0 || secs > self.timeout_seconds {
                bail!("request_timeout_seconds must be in 1..=timeout_seconds");
            }
        }
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be > 0");
        }
        if self.expansion.max_terms == 0 {
            bail!("expansion.max_terms must be > 0");
        }
        if self.limits.max_query_chars == 0 {
            bail!("limits.max_query_chars must be > 0");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be >= 1");
        }
        for (name, model) in [
            ("models.expansion", &self.models.expansion),
            ("models.rewrite", &self.models.rewrite),
            ("models.answer", &self.models.answer),
            ("embedding.model", &self.embedding.model),
        ] {
            if model.trim().is_empty() {
                bail!("{} must not be empty", name);
            }
        }
        if self.vector_index.collection.trim().is_empty() {
            bail!("vector_index.collection must not be empty");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Timeout of a single HTTP request. Shorter than the stage budget so a
    /// timed-out request can still be retried within it.
    pub fn request_timeout(&self) -> Duration {
        match self.request_timeout_seconds {
            Some(secs) => Duration::from_secs(secs),
            None => self.timeout() / self.retry.max_attempts.max(1) as u32,
        }
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file (`LEGAL_RAG_CONFIG`, then the user config dir),
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading pipeline config");
                Self::from_file(&path)?
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("LEGAL_RAG_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("legal-rag").join("config.json"))
            .filter(|path| path.exists())
    }

    /// Apply the environment variables the deployment sets.
    /// `lookup` is injected so overrides can be tested without touching the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.completion.api_key = key.clone();
            self.embedding.api_key = key;
        }
        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.completion.base_url = Some(url.clone());
            self.embedding.base_url = Some(url);
        }
        if let Some(url) = non_empty("QDRANT_URL") {
            self.vector_index.url = url;
        }
        if let Some(key) = non_empty("QDRANT_API_KEY") {
            self.vector_index.api_key = Some(key);
        }
        if let Some(collection) = non_empty("QDRANT_COLLECTION") {
            self.vector_index.collection = collection;
        }
        if let Some(model) = non_empty("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.models.answer = model;
        }
        if let Some(top_k) = non_empty("LEGAL_RAG_TOP_K") {
            self.retrieval.top_k = top_k
                .trim()
                .parse()
                .with_context(|| format!("LEGAL_RAG_TOP_K is not a number: {}", top_k))?;
        }
        if let Some(secs) = non_empty("LEGAL_RAG_REQUEST_TIMEOUT_SECONDS") {
            self.request_timeout_seconds = Some(secs.trim().parse().with_context(|| {
                format!("LEGAL_RAG_REQUEST_TIMEOUT_SECONDS is not a number: {}", secs)
            })?);
        }
        if let Some(secs) = non_empty("LEGAL_RAG_TIMEOUT_SECONDS") {
            self.timeout_seconds = secs
                .trim()
                .parse()
                .with_context(|| format!("LEGAL_RAG_TIMEOUT_SECONDS is not a number: {}", secs))?;
        }
        Ok(())
    }
}

//! Error types for the legal RAG pipeline
//!
//! Two layers:
//! - [`ClientError`]: failures of a single call to a remote collaborator
//!   (completion model, embedding model, vector index). Adapters classify
//!   these so the retry policy can tell transient from permanent failures.
//! - [`PipelineError`]: the fatal outcome of one pipeline invocation, tagged
//!   with the stage that failed.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Pipeline stages that talk to remote collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Expanding,
    Rewriting,
    Retrieving,
    Generating,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Expanding => "expanding",
            Stage::Rewriting => "rewriting",
            Stage::Retrieving => "retrieving",
            Stage::Generating => "generating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a remote client adapter.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Request did not complete within the client timeout
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// TCP/TLS connection could not be established
    #[error("Failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    /// Upstream rejected the request with HTTP 429
    #[error("Rate limited by {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<Duration>,
    },

    /// Upstream answered with a non-success HTTP status
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Response could not be interpreted (HTML page, bad JSON, missing fields)
    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    /// Embedding length does not match the vector index collection
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Client is missing a required setting (API key, URL)
    #[error("Client not configured: {0}")]
    NotConfigured(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout { .. }
            | ClientError::Connect { .. }
            | ClientError::RateLimited { .. } => true,
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::InvalidResponse { .. }
            | ClientError::DimensionMismatch { .. }
            | ClientError::NotConfigured(_) => false,
        }
    }

    /// Server-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else if err.is_connect() {
            ClientError::Connect {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else if err.is_decode() || err.is_body() {
            ClientError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            ClientError::Connect {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Fatal outcome of a pipeline invocation.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Empty or otherwise unusable user question
    #[error("Malformed query: {0}")]
    MalformedInput(String),

    /// A remote collaborator failed during a stage that cannot degrade
    #[error("Upstream unavailable during {stage}: {source}")]
    Upstream {
        stage: Stage,
        #[source]
        source: ClientError,
    },

    /// Stage exceeded its time budget
    #[error("Stage {stage} timed out after {seconds}s")]
    Timeout { stage: Stage, seconds: u64 },

    /// Caller abandoned the turn
    #[error("Cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::MalformedInput(_) => None,
            PipelineError::Upstream { stage, .. }
            | PipelineError::Timeout { stage, .. }
            | PipelineError::Cancelled { stage } => Some(*stage),
        }
    }

    pub fn is_malformed_input(&self) -> bool {
        matches!(self, PipelineError::MalformedInput(_))
    }

    /// Text shown to the end user. Never contains statute references.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::MalformedInput(_) => {
                "Пожалуйста, сформулируйте вопрос текстом: сообщение пустое или слишком длинное."
                    .to_string()
            }
            PipelineError::Cancelled { .. } => "Запрос был отменён.".to_string(),
            PipelineError::Upstream { .. } | PipelineError::Timeout { .. } => {
                "Извините, сейчас не удалось обработать вопрос: сервис поиска по кодексам \
                 временно недоступен. Попробуйте повторить запрос позже."
                    .to_string()
            }
        }
    }
}

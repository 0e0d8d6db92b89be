//! Legal question answering over Russian statutory codes.
//!
//! A four-stage retrieval-augmented pipeline: legal keyword expansion, query
//! rewriting, vector retrieval from a Qdrant collection of code articles, and
//! answer generation with citations checked against the retrieved articles.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod rag;
pub mod retry;
pub mod storage;
pub mod types;

mod http;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use embeddings::{Embedder, OpenAiEmbedder};
pub use error::{ClientError, PipelineError, Stage};
pub use llm::{ApiProvider, ChatMessage, ChatRole, Completer, GenerationConfig, OpenAiCompleter};
pub use pipeline::LegalRagPipeline;
pub use storage::{PassageFilter, QdrantStore, SearchHit, Searcher};
pub use types::{
    ArticleRef, ChatTurn, Context, GroundingStatus, PipelineOutcome, PipelineState, ReplyKind,
    RetrievedPassage, StatuteCode, TurnReply, UserQuery,
};

// Re-export common types
pub use tokio_util::sync::CancellationToken;
pub use uuid::Uuid;

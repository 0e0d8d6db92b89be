pub mod openai;

use async_trait::async_trait;

use crate::error::ClientError;

pub use openai::OpenAiEmbedder;

/// Text-to-vector capability used by retrieval
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a search query
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError>;

    /// Embedding vector dimension; must match the vector index collection
    fn dimension(&self) -> usize;
}

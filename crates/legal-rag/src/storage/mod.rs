//! Vector index access: the search capability and its Qdrant adapter

pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ClientError;
use crate::types::RetrievedPassage;

pub use qdrant::QdrantStore;

/// Nearest-neighbour search over the statute collection
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Return at most `top_k` hits, best first
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &PassageFilter,
    ) -> Result<Vec<SearchHit>, ClientError>;
}

/// Restricts a search to a subset of the corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassageFilter {
    /// Ingestion code ids (`gk1`, `tk`, ...); empty means the whole corpus
    pub code_ids: Vec<String>,
}

impl PassageFilter {
    pub fn codes(code_ids: &[String]) -> Self {
        Self {
            code_ids: code_ids.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.code_ids.is_empty()
    }

    /// Qdrant `filter` clause, or `None` when nothing is restricted.
    pub fn to_qdrant_filter(&self) -> Option<Value> {
        if self.code_ids.is_empty() {
            return None;
        }
        Some(json!({
            "must": [
                { "key": "codex_id", "match": { "any": self.code_ids } }
            ]
        }))
    }
}

/// Raw hit as stored by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: Value,
}

impl SearchHit {
    /// Decode the ingestion payload. Hits without an article number or text
    /// are unusable as citations and yield `None`.
    pub fn into_passage(self) -> Option<RetrievedPassage> {
        let field = |key: &str| -> String {
            match self.payload.get(key) {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            }
        };

        let article_number = field("article_num");
        let text = field("text");
        if article_number.is_empty() || text.is_empty() {
            return None;
        }

        Some(RetrievedPassage {
            code_name: field("codex"),
            code_id: field("codex_id"),
            chapter: field("chapter"),
            article_title: field("article_title"),
            url: field("url"),
            article_number,
            text,
            point_id: self.id,
            score: self.score,
        })
    }
}

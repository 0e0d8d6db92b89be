//! Vector retrieval: embed the rewritten query and search the statute index

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::embeddings::Embedder;
use crate::error::ClientError;
use crate::storage::{PassageFilter, Searcher};
use crate::types::{Context, RetrievedPassage, RewrittenQuery};

/// Stage 3
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    searcher: Arc<dyn Searcher>,
    top_k: usize,
    filter: PassageFilter,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        searcher: Arc<dyn Searcher>,
        top_k: usize,
        filter: PassageFilter,
    ) -> Self {
        Self {
            embedder,
            searcher,
            top_k,
            filter,
        }
    }

    /// Fetch up to `top_k` passages. An empty context is a valid result.
    pub async fn retrieve(&self, query: &RewrittenQuery) -> Result<Context, ClientError> {
        let vector = self.embedder.embed(&query.text).await?;
        if vector.len() != self.embedder.dimension() {
            return Err(ClientError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: vector.len(),
            });
        }

        let hits = self.searcher.search(&vector, self.top_k, &self.filter).await?;
        let total = hits.len();

        let passages: Vec<RetrievedPassage> = hits
            .into_iter()
            .filter_map(|hit| {
                let id = hit.id.clone();
                let passage = hit.into_passage();
                if passage.is_none() {
                    tracing::warn!(point_id = %id, "Skipping hit without article number or text");
                }
                passage
            })
            .collect();

        let shaped = shape(passages, self.top_k);
        tracing::info!(
            top_k = self.top_k,
            hits = total,
            passages = shaped.len(),
            best_score = shaped.first().map(|p| p.score).unwrap_or(0.0),
            "Retrieved statute passages"
        );
        Ok(Context::new(shaped))
    }
}

/// Enforce retrieval invariants regardless of what the index returned:
/// scores non-increasing, one passage per article (best score wins), at most `top_k`.
pub fn shape(mut passages: Vec<RetrievedPassage>, top_k: usize) -> Vec<RetrievedPassage> {
    passages.retain(|p| !p.score.is_nan());
    // Stable sort keeps index order among equal scores
    passages.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut seen = HashSet::new();
    passages.retain(|p| seen.insert(p.dedup_key()));
    passages.truncate(top_k);
    passages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SearchHit;
    use crate::types::RewriteSource;
    use async_trait::async_trait;
    use serde_json::json;

    fn passage(code_id: &str, num: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            point_id: format!("{}:{}", code_id, num),
            code_name: "Гражданский кодекс РФ".into(),
            code_id: code_id.into(),
            article_number: num.into(),
            article_title: String::new(),
            chapter: String::new(),
            text: "текст".into(),
            url: String::new(),
            score,
        }
    }

    struct HashEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError> {
            let mut v = vec![0.0; self.dimension];
            for (i, b) in text.bytes().enumerate() {
                v[i % self.dimension] += b as f32;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ClientError> {
            Ok(vec![0.0; 8])
        }

        fn dimension(&self) -> usize {
            1536
        }
    }

    struct FrozenIndex(Vec<SearchHit>);

    #[async_trait]
    impl Searcher for FrozenIndex {
        async fn search(
            &self,
            _vector: &[f32],
            top_k: usize,
            _filter: &PassageFilter,
        ) -> Result<Vec<SearchHit>, ClientError> {
            Ok(self.0.iter().take(top_k).cloned().collect())
        }
    }

    fn hit(id: &str, code_id: &str, num: &str, score: f32) -> SearchHit {
        SearchHit {
            id: id.into(),
            score,
            payload: json!({
                "codex": "Гражданский кодекс РФ (часть 1)",
                "codex_id": code_id,
                "article_num": num,
                "article_title": "",
                "text": format!("Статья {}", num),
            }),
        }
    }

    fn query(text: &str) -> RewrittenQuery {
        RewrittenQuery {
            text: text.into(),
            source: RewriteSource::Rewritten,
        }
    }

    #[test]
    fn test_shape_sorts_dedupes_truncates() {
        let shaped = shape(
            vec![
                passage("gk1", "301", 0.5),
                passage("gk1", "209", 0.9),
                passage("gk1", "209.", 0.4),
                passage("jk", "209", 0.45),
                passage("gk1", "1", f32::NAN),
                passage("gk1", "2", 0.1),
            ],
            3,
        );
        let ids: Vec<_> = shaped.iter().map(|p| p.point_id.as_str()).collect();
        assert_eq!(ids, vec!["gk1:209", "gk1:301", "jk:209"]);
        assert!(shaped.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_shape_is_idempotent() {
        let input = vec![passage("gk1", "301", 0.5), passage("gk1", "209", 0.9), passage("uk", "264", 0.7)];
        let once = shape(input, 2);
        let twice = shape(once.clone(), 2);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_retrieve_is_idempotent_for_frozen_corpus() {
        let retriever = Retriever::new(
            Arc::new(HashEmbedder { dimension: 16 }),
            Arc::new(FrozenIndex(vec![
                hit("1", "gk1", "209", 0.81),
                hit("2", "gk1", "301", 0.77),
                hit("3", "gk1", "209", 0.60),
                SearchHit { id: "4".into(), score: 0.5, payload: json!({"codex_id": "gk1"}) },
            ])),
            7,
            PassageFilter::default(),
        );

        let first = retriever.retrieve(&query("истребование имущества")).await.unwrap();
        let second = retriever.retrieve(&query("истребование имущества")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.article_refs()[1].key(), "gk1:301");
    }

    #[tokio::test]
    async fn test_empty_index_is_not_an_error() {
        let retriever = Retriever::new(
            Arc::new(HashEmbedder { dimension: 4 }),
            Arc::new(FrozenIndex(Vec::new())),
            7,
            PassageFilter::default(),
        );
        assert!(retriever.retrieve(&query("что угодно")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let retriever = Retriever::new(
            Arc::new(BrokenEmbedder),
            Arc::new(FrozenIndex(Vec::new())),
            7,
            PassageFilter::default(),
        );
        let err = retriever.retrieve(&query("x")).await.unwrap_err();
        assert!(matches!(err, ClientError::DimensionMismatch { expected: 1536, actual: 8 }));
    }
}

//! Qdrant REST adapter for the `russian_law` collection

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{PassageFilter, SearchHit, Searcher};
use crate::config::{PipelineConfig, RetryPolicy, VectorIndexConfig};
use crate::error::ClientError;
use crate::http;
use crate::retry::with_retry;

pub struct QdrantStore {
    url: String,
    api_key: Option<String>,
    collection: String,
    score_threshold: f32,
    client: Client,
    retry: RetryPolicy,
}

impl QdrantStore {
    pub fn new(
        config: &VectorIndexConfig,
        score_threshold: f32,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        if config.url.trim().is_empty() {
            return Err(ClientError::NotConfigured("Qdrant URL is not set".to_string()));
        }

        tracing::info!(
            url = %config.url,
            collection = %config.collection,
            score_threshold,
            "Opening Qdrant collection"
        );

        Ok(Self {
            url: config.url.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            collection: config.collection.clone(),
            score_threshold,
            client: http::build_client(request_timeout)?,
            retry,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ClientError> {
        Self::new(
            &config.vector_index,
            config.retrieval.score_threshold,
            config.retry.clone(),
            config.request_timeout(),
        )
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, endpoint);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn build_query(&self, vector: &[f32], top_k: usize, filter: &PassageFilter) -> Value {
        let mut body = json!({
            "query": vector,
            "limit": top_k,
            "with_payload": true,
            "score_threshold": self.score_threshold,
        });
        if let Some(f) = filter.to_qdrant_filter() {
            body["filter"] = f;
        }
        body
    }

    async fn query_once(&self, endpoint: &str, body: &Value) -> Result<Vec<SearchHit>, ClientError> {
        let response = self
            .request(reqwest::Method::POST, endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(endpoint, e))?;

        let parsed: QueryResponse = http::read_json(response, endpoint).await?;
        Ok(parsed.result.points.into_iter().map(SearchHit::from).collect())
    }

    /// Number of points in the collection; used as a readiness probe.
    pub async fn count(&self) -> Result<usize, ClientError> {
        let endpoint = http::join_url(
            &self.url,
            &format!("collections/{}/points/count", self.collection),
        );
        let body = json!({ "exact": false });

        with_retry(&self.retry, "qdrant_count", || async {
            let response = self
                .request(reqwest::Method::POST, &endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| ClientError::from_reqwest(&endpoint, e))?;
            let parsed: CountResponse = http::read_json(response, &endpoint).await?;
            Ok(parsed.result.count)
        })
        .await
    }
}

#[async_trait]
impl Searcher for QdrantStore {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &PassageFilter,
    ) -> Result<Vec<SearchHit>, ClientError> {
        let endpoint = http::join_url(
            &self.url,
            &format!("collections/{}/points/query", self.collection),
        );
        let body = self.build_query(vector, top_k, filter);

        let hits = with_retry(&self.retry, "qdrant_query", || {
            self.query_once(&endpoint, &body)
        })
        .await?;

        tracing::debug!(
            collection = %self.collection,
            top_k,
            hits = hits.len(),
            filtered = !filter.is_empty(),
            "Vector search complete"
        );
        Ok(hits)
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Deserialize)]
struct QueryResult {
    #[serde(default)]
    points: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Value,
}

impl From<ScoredPoint> for SearchHit {
    fn from(point: ScoredPoint) -> Self {
        // Qdrant ids are unsigned integers or UUID strings
        let id = match point.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        SearchHit {
            id,
            score: point.score,
            payload: point.payload,
        }
    }
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> QdrantStore {
        QdrantStore::new(
            &VectorIndexConfig::default(),
            0.3,
            RetryPolicy::none(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_query_body() {
        let store = store();
        let body = store.build_query(&[0.1, 0.2], 7, &PassageFilter::default());
        assert_eq!(body["limit"], 7);
        assert_eq!(body["with_payload"], true);
        assert!((body["score_threshold"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert!(body.get("filter").is_none());

        let filtered = store.build_query(&[0.1], 3, &PassageFilter::codes(&["tk".to_string()]));
        assert_eq!(filtered["filter"]["must"][0]["match"]["any"][0], "tk");
    }

    #[test]
    fn test_parse_query_response() {
        let body = r#"{
            "result": {"points": [
                {"id": 17, "version": 3, "score": 0.82, "payload": {"codex_id": "gk1", "article_num": "209", "text": "..."}},
                {"id": "6f1c9a6e-2f7b-4d55-9c43-0f1f0a7c2b11", "score": 0.41, "payload": {}}
            ]},
            "status": "ok",
            "time": 0.002
        }"#;
        let parsed: QueryResponse = http::parse_json_body(body, "q").unwrap();
        let hits: Vec<SearchHit> = parsed.result.points.into_iter().map(SearchHit::from).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "17");
        assert_eq!(hits[1].id, "6f1c9a6e-2f7b-4d55-9c43-0f1f0a7c2b11");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_empty_url_is_rejected() {
        let config = VectorIndexConfig {
            url: String::new(),
            ..VectorIndexConfig::default()
        };
        assert!(QdrantStore::new(&config, 0.3, RetryPolicy::none(), Duration::from_secs(1)).is_err());
    }
}

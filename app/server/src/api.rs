//! OpenAI-compatible routes

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use legal_rag::{ChatMessage, ChatTurn, GroundingStatus, LegalRagPipeline, ReplyKind, TurnReply};

pub const MODEL_ID: &str = "legal_rag";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LegalRagPipeline>,
    /// Bearer token required from clients, if set
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    #[serde(default)]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<Choice>,
    legal_rag: LegalRagExtension,
}

#[derive(Debug, Serialize)]
struct Choice {
    index: usize,
    message: ChatMessage,
    finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
struct LegalRagExtension {
    kind: ReplyKind,
    citations: Vec<String>,
    grounding: Option<GroundingStatus>,
}

fn error_response(status: StatusCode, message: impl Into<String>, kind: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "message": message.into(), "type": kind } })),
    )
        .into_response()
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.api_key else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim() == expected)
        .unwrap_or(false)
}

async fn health_check() -> &'static str {
    "Legal RAG API is running"
}

async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid API key", "authentication_error");
    }
    Json(json!({
        "object": "list",
        "data": [{
            "id": MODEL_ID,
            "object": "model",
            "owned_by": "legal-rag",
            "name": "Russian Legal RAG"
        }]
    }))
    .into_response()
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    if !authorized(&state, &headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid API key", "authentication_error");
    }

    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "Malformed chat request");
            return error_response(
                StatusCode::BAD_REQUEST,
                rejection.body_text(),
                "invalid_request_error",
            );
        }
    };

    tracing::info!(
        model = request.model.as_deref().unwrap_or(MODEL_ID),
        messages = request.messages.len(),
        stream = request.stream,
        "Chat completion request"
    );

    let turn = ChatTurn::new(request.messages);
    match state.pipeline.answer(&turn).await {
        Ok(outcome) => {
            let id = format!("chatcmpl-{}", outcome.request_id);
            let created = chrono::Utc::now().timestamp();
            let reply = TurnReply::from(outcome);
            if request.stream {
                return stream_reply(id, created, reply);
            }
            Json(ChatCompletionResponse {
                id,
                object: "chat.completion",
                created,
                model: MODEL_ID.to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::assistant(reply.text),
                    finish_reason: "stop",
                }],
                legal_rag: LegalRagExtension {
                    kind: reply.kind,
                    citations: reply.citations,
                    grounding: reply.grounding,
                },
            })
            .into_response()
        }
        Err(e) if e.is_malformed_input() => {
            error_response(StatusCode::BAD_REQUEST, e.user_message(), "invalid_request_error")
        }
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.user_message(), "pipeline_failed"),
    }
}

/// Server-sent events in the `chat.completion.chunk` format. The answer is
/// complete and validated before the first event is written.
fn stream_reply(id: String, created: i64, reply: TurnReply) -> Response {
    let content = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": MODEL_ID,
        "choices": [{
            "index": 0,
            "delta": { "role": "assistant", "content": reply.text },
            "finish_reason": null
        }]
    });
    let finish = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": MODEL_ID,
        "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
        "legal_rag": LegalRagExtension {
            kind: reply.kind,
            citations: reply.citations,
            grounding: reply.grounding,
        }
    });

    let events = [content.to_string(), finish.to_string(), "[DONE]".to_string()]
        .into_iter()
        .map(|data| Ok::<_, Infallible>(Event::default().data(data)));
    Sse::new(futures::stream::iter(events)).into_response()
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health_check))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use legal_rag::{
        ClientError, Completer, Embedder, GenerationConfig, PassageFilter, PipelineConfig,
        SearchHit, Searcher,
    };
    use legal_rag::llm::ProviderInfo;
    use tower::ServiceExt;

    struct EchoCompleter {
        fail: bool,
    }

    #[async_trait]
    impl Completer for EchoCompleter {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            options: &GenerationConfig,
        ) -> Result<String, ClientError> {
            if self.fail && options.max_tokens > 1000 {
                return Err(ClientError::Timeout {
                    endpoint: "stub".into(),
                });
            }
            Ok("Собственнику принадлежат права владения (ст. 209 ГК РФ).".into())
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "stub".into(),
                endpoint: "stub".into(),
            }
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ClientError> {
            Ok(vec![1.0; 4])
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    struct OneArticle;

    #[async_trait]
    impl Searcher for OneArticle {
        async fn search(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _filter: &PassageFilter,
        ) -> Result<Vec<SearchHit>, ClientError> {
            Ok(vec![SearchHit {
                id: "1".into(),
                score: 0.9,
                payload: json!({
                    "codex": "Гражданский кодекс РФ (часть 1)",
                    "codex_id": "gk1",
                    "article_num": "209",
                    "article_title": "Содержание права собственности",
                    "text": "Собственнику принадлежат права владения, пользования и распоряжения своим имуществом."
                }),
            }])
        }
    }

    fn app(api_key: Option<&str>, fail: bool) -> Router {
        let mut config = PipelineConfig::default();
        config.embedding.dimension = 4;
        let pipeline = LegalRagPipeline::new(
            config,
            Arc::new(EchoCompleter { fail }),
            Arc::new(UnitEmbedder),
            Arc::new(OneArticle),
        )
        .unwrap();
        router(AppState {
            pipeline: Arc::new(pipeline),
            api_key: api_key.map(str::to_string),
        })
    }

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_completion() {
        let response = app(None, false)
            .oneshot(chat_request(json!({
                "model": "legal_rag",
                "messages": [{"role": "user", "content": "Какие права у собственника?"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["role"], "assistant");
        assert_eq!(body["legal_rag"]["kind"], "answer");
        assert_eq!(body["legal_rag"]["citations"][0], "ст. 209 ГК РФ");
        assert_eq!(body["legal_rag"]["grounding"], "verified");
    }

    #[tokio::test]
    async fn test_status_codes() {
        let empty = app(None, false)
            .oneshot(chat_request(json!({"messages": [{"role": "user", "content": "  "}]})))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        let malformed = app(None, false)
            .oneshot(chat_request(json!({"prompt": "hi"})))
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let failed = app(None, true)
            .oneshot(chat_request(json!({"messages": [{"role": "user", "content": "вопрос"}]})))
            .await
            .unwrap();
        assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(failed).await;
        assert_eq!(body["error"]["type"], "pipeline_failed");
    }

    #[tokio::test]
    async fn test_streaming_chat_completion() {
        let response = app(None, false)
            .oneshot(chat_request(json!({
                "model": "legal_rag",
                "stream": true,
                "messages": [{"role": "user", "content": "Какие права у собственника?"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert_eq!(data.len(), 3);
        assert_eq!(data[2], "[DONE]");

        let first: serde_json::Value = serde_json::from_str(data[0]).unwrap();
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert!(first["choices"][0]["delta"]["content"]
            .as_str()
            .unwrap()
            .contains("ст. 209 ГК РФ"));

        let last: serde_json::Value = serde_json::from_str(data[1]).unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["legal_rag"]["grounding"], "verified");
        assert_eq!(last["id"], first["id"]);
    }

    #[tokio::test]
    async fn test_streaming_failure_is_plain_error() {
        let response = app(None, true)
            .oneshot(chat_request(json!({
                "stream": true,
                "messages": [{"role": "user", "content": "вопрос"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "pipeline_failed");
    }

    #[tokio::test]
    async fn test_content_parts_request() {
        let response = app(None, false)
            .oneshot(chat_request(json!({
                "messages": [{
                    "role": "user",
                    "content": [{"type": "text", "text": "Какие права у собственника?"}]
                }]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["legal_rag"]["kind"], "answer");
    }

    #[tokio::test]
    async fn test_api_key() {
        let unauthorized = app(Some("secret"), false)
            .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

        let authorized = app(Some("secret"), false)
            .oneshot(
                Request::get("/v1/models")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(authorized.status(), StatusCode::OK);
        let body = json_body(authorized).await;
        assert_eq!(body["data"][0]["id"], MODEL_ID);
    }
}

//! Scripted collaborators shared by the pipeline and eval tests

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::embeddings::Embedder;
use crate::error::{ClientError, Stage};
use crate::llm::{ChatMessage, Completer, GenerationConfig, ProviderInfo};
use crate::rag::keyword_expander::EXPANSION_PROMPT;
use crate::rag::query_rewriter::REWRITE_PROMPT;
use crate::storage::{PassageFilter, SearchHit, Searcher};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Fail,
    Hang,
}

impl Reply {
    pub(crate) fn text(s: &str) -> Self {
        Reply::Text(s.to_string())
    }

    async fn resolve(&self) -> Result<String, ClientError> {
        match self {
            Reply::Text(s) => Ok(s.clone()),
            Reply::Fail => Err(ClientError::Status {
                endpoint: "stub".into(),
                status: 503,
                body: "unavailable".into(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Completer that answers by stage, recognised from the system prompt.
pub(crate) struct ScriptedCompleter {
    expansion: Reply,
    rewrite: Reply,
    /// Answers in call order; the last one repeats
    answers: Vec<Reply>,
    answer_calls: AtomicUsize,
    calls: Mutex<Vec<Stage>>,
    answer_prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompleter {
    pub(crate) fn new(expansion: Reply, rewrite: Reply, answers: Vec<Reply>) -> Self {
        Self {
            expansion,
            rewrite,
            answers,
            answer_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            answer_prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn answer_prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.answer_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &GenerationConfig,
    ) -> Result<String, ClientError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let reply = if system == EXPANSION_PROMPT {
            self.calls.lock().unwrap().push(Stage::Expanding);
            self.expansion.clone()
        } else if system == REWRITE_PROMPT {
            self.calls.lock().unwrap().push(Stage::Rewriting);
            self.rewrite.clone()
        } else {
            self.calls.lock().unwrap().push(Stage::Generating);
            self.answer_prompts.lock().unwrap().push(messages.to_vec());
            let idx = self.answer_calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .get(idx.min(self.answers.len().saturating_sub(1)))
                .cloned()
                .unwrap_or(Reply::Fail)
        };
        reply.resolve().await
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "scripted".into(),
            endpoint: "memory".into(),
        }
    }
}

/// Deterministic byte-histogram embedding.
pub(crate) struct HashEmbedder;

pub(crate) const TEST_DIMENSION: usize = 32;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError> {
        let mut v = vec![0.0; TEST_DIMENSION];
        for (i, b) in text.bytes().enumerate() {
            v[(i + b as usize) % TEST_DIMENSION] += 1.0;
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }
}

/// Frozen index returning the same hits for every query.
pub(crate) struct FixtureIndex {
    hits: Vec<SearchHit>,
    hang: bool,
    searches: AtomicUsize,
}

impl FixtureIndex {
    pub(crate) fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            hang: false,
            searches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::empty()
        }
    }

    pub(crate) fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Searcher for FixtureIndex {
    async fn search(
        &self,
        _vector: &[f32],
        top_k: usize,
        _filter: &PassageFilter,
    ) -> Result<Vec<SearchHit>, ClientError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
}

pub(crate) fn article_hit(
    codex: &str,
    codex_id: &str,
    article_num: &str,
    title: &str,
    text: &str,
    score: f32,
) -> SearchHit {
    SearchHit {
        id: format!("{}:{}", codex_id, article_num),
        score,
        payload: json!({
            "codex": codex,
            "codex_id": codex_id,
            "chapter": "",
            "article_num": article_num,
            "article_title": title,
            "text": text,
            "url": "",
        }),
    }
}

/// ст. 209 and ст. 301 of the Civil Code.
pub(crate) fn civil_property_hits() -> Vec<SearchHit> {
    vec![
        article_hit(
            "Гражданский кодекс РФ (часть 1)",
            "gk1",
            "209",
            "Содержание права собственности",
            "1. Собственнику принадлежат права владения, пользования и распоряжения своим имуществом.",
            0.82,
        ),
        article_hit(
            "Гражданский кодекс РФ (часть 1)",
            "gk1",
            "301",
            "Истребование имущества из чужого незаконного владения",
            "Собственник вправе истребовать свое имущество из чужого незаконного владения.",
            0.74,
        ),
    ]
}

/// Housing and tenancy articles relevant to eviction by a landlord.
pub(crate) fn housing_hits() -> Vec<SearchHit> {
    vec![
        article_hit(
            "Жилищный кодекс РФ",
            "jk",
            "35",
            "Выселение гражданина, право пользования жилым помещением которого прекращено или который нарушает правила пользования жилым помещением",
            "1. В случае прекращения у гражданина права пользования жилым помещением ... гражданин обязан освободить соответствующее жилое помещение ... Если данный гражданин в срок, установленный собственником, не освобождает указанное жилое помещение, он подлежит выселению по требованию собственника на основании решения суда.",
            0.71,
        ),
        article_hit(
            "Гражданский кодекс РФ (часть 2)",
            "gk2",
            "687",
            "Расторжение договора найма жилого помещения",
            "2. Договор найма жилого помещения может быть расторгнут в судебном порядке по требованию наймодателя ...",
            0.69,
        ),
        article_hit(
            "Гражданский кодекс РФ (часть 2)",
            "gk2",
            "610",
            "Расторжение договора аренды, заключенного на неопределенный срок",
            "2. Если договор аренды заключен без указания срока, каждая из сторон вправе в любое время отказаться от договора, предупредив об этом другую сторону за один месяц ...",
            0.64,
        ),
    ]
}

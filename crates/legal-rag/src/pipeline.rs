//! Four-stage legal RAG pipeline
//!
//! `Received → Expanding → Rewriting → Retrieving → Generating → Completed`.
//! Expansion and rewriting degrade to the user's question on failure;
//! retrieval and generation failures are fatal. Every stage runs under the
//! configured timeout and can be cancelled by the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::embeddings::{Embedder, OpenAiEmbedder};
use crate::error::{ClientError, PipelineError, Stage};
use crate::llm::{ChatMessage, Completer, GenerationConfig, OpenAiCompleter};
use crate::rag::citation_validator::CitationValidator;
use crate::rag::keyword_expander::KeywordExpander;
use crate::rag::prompt;
use crate::rag::query_rewriter::QueryRewriter;
use crate::rag::retriever::Retriever;
use crate::storage::{PassageFilter, QdrantStore, Searcher};
use crate::types::{
    ArticleRef, ChatTurn, Context, ExpandedTerms, GroundingStatus, PipelineOutcome,
    PipelineState, RewrittenQuery, TurnReply, UserQuery,
};

const ANSWER_TEMPERATURE: f32 = 0.1;
const ANSWER_MAX_TOKENS: usize = 2000;

/// Answer produced by the generation stage
struct Generated {
    answer: String,
    citations: Vec<ArticleRef>,
    grounding: GroundingStatus,
}

/// Shared, lock-free pipeline; one instance serves concurrent turns.
pub struct LegalRagPipeline {
    config: PipelineConfig,
    completer: Arc<dyn Completer>,
    expander: KeywordExpander,
    rewriter: QueryRewriter,
    retriever: Retriever,
    validator: CitationValidator,
}

impl LegalRagPipeline {
    pub fn new(
        config: PipelineConfig,
        completer: Arc<dyn Completer>,
        embedder: Arc<dyn Embedder>,
        searcher: Arc<dyn Searcher>,
    ) -> Result<Self> {
        config.validate()?;

        let expander = KeywordExpander::new(
            completer.clone(),
            &config.models.expansion,
            config.expansion.max_terms,
        );
        let rewriter = QueryRewriter::new(
            completer.clone(),
            &config.models.rewrite,
            config.rewrite.history_window,
        );
        let retriever = Retriever::new(
            embedder,
            searcher,
            config.retrieval.top_k,
            PassageFilter::codes(&config.retrieval.code_filter),
        );

        tracing::info!(
            provider = %completer.info().name,
            answer_model = %config.models.answer,
            top_k = config.retrieval.top_k,
            timeout_s = config.timeout_seconds,
            "Legal RAG pipeline ready"
        );

        Ok(Self {
            config,
            completer,
            expander,
            rewriter,
            retriever,
            validator: CitationValidator::new(),
        })
    }

    /// Wire the HTTP adapters described by `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let completer: Arc<dyn Completer> = Arc::new(OpenAiCompleter::from_config(&config)?);
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::from_config(&config)?);
        let searcher: Arc<dyn Searcher> = Arc::new(QdrantStore::from_config(&config)?);
        Self::new(config, completer, embedder, searcher)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answer the latest user message of the turn.
    pub async fn answer(&self, turn: &ChatTurn) -> Result<PipelineOutcome, PipelineError> {
        self.answer_with_cancel(turn, CancellationToken::new()).await
    }

    /// Like [`answer`](Self::answer); stops at the next stage boundary or
    /// outstanding call once `cancel` fires.
    pub async fn answer_with_cancel(
        &self,
        turn: &ChatTurn,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("legal_rag_turn", %request_id);
        self.run(turn, &cancel, request_id).instrument(span).await
    }

    /// Chat-layer view: never fails, distinguishes "no statute" from "failed".
    pub async fn respond(&self, turn: &ChatTurn) -> TurnReply {
        match self.answer(turn).await {
            Ok(outcome) => outcome.into(),
            Err(e) => TurnReply::from(&e),
        }
    }

    /// Retrieval alone on the raw question, without expansion or rewriting.
    pub async fn retrieve(&self, question: &str) -> Result<Context, PipelineError> {
        let query = UserQuery::parse(question, self.config.limits.max_query_chars)?;
        let cancel = CancellationToken::new();
        self.guarded(
            Stage::Retrieving,
            &cancel,
            self.retriever.retrieve(&RewrittenQuery::pass_through(&query)),
        )
        .await
        .and_then(|r| Self::upstream(Stage::Retrieving, r))
    }

    async fn run(
        &self,
        turn: &ChatTurn,
        cancel: &CancellationToken,
        request_id: Uuid,
    ) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let mut trace = vec![PipelineState::Received];

        let query = UserQuery::parse(
            turn.latest_user_message().unwrap_or_default(),
            self.config.limits.max_query_chars,
        )
        .map_err(|e| Self::fail(e, &mut trace))?;

        // Stage 1
        trace.push(PipelineState::Expanding);
        let terms = match self
            .guarded(Stage::Expanding, cancel, self.expander.expand(&query))
            .await
        {
            Ok(terms) => terms,
            Err(PipelineError::Timeout { stage, seconds }) => {
                tracing::warn!(%stage, seconds, "Keyword expansion timed out, passing query through");
                ExpandedTerms::pass_through(&query)
            }
            Err(e) => return Err(Self::fail(e, &mut trace)),
        };

        // Stage 2
        trace.push(PipelineState::Rewriting);
        let rewritten = match self
            .guarded(
                Stage::Rewriting,
                cancel,
                self.rewriter.rewrite(&query, &terms, turn.history()),
            )
            .await
        {
            Ok(rewritten) => rewritten,
            Err(PipelineError::Timeout { stage, seconds }) => {
                tracing::warn!(%stage, seconds, "Query rewrite timed out, using original");
                RewrittenQuery::pass_through(&query)
            }
            Err(e) => return Err(Self::fail(e, &mut trace)),
        };

        // Stage 3
        trace.push(PipelineState::Retrieving);
        let context = self
            .guarded(Stage::Retrieving, cancel, self.retriever.retrieve(&rewritten))
            .await
            .and_then(|r| Self::upstream(Stage::Retrieving, r))
            .map_err(|e| Self::fail(e, &mut trace))?;

        // Stage 4
        trace.push(PipelineState::Generating);
        let generated = self
            .guarded(Stage::Generating, cancel, self.generate(&query, &context))
            .await
            .and_then(|r| Self::upstream(Stage::Generating, r))
            .map_err(|e| Self::fail(e, &mut trace))?;

        trace.push(PipelineState::Completed);
        tracing::info!(
            passages = context.len(),
            citations = generated.citations.len(),
            grounding = ?generated.grounding,
            degraded = terms.is_degraded(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn completed"
        );

        Ok(PipelineOutcome {
            request_id,
            answer: generated.answer,
            citations: generated.citations,
            passages: context.into_passages(),
            expanded_terms: terms,
            rewritten_query: rewritten,
            grounding: generated.grounding,
            trace,
        })
    }

    /// Generate, validate citations, regenerate on violation, then fall back.
    async fn generate(&self, query: &UserQuery, context: &Context) -> Result<Generated, ClientError> {
        let options = GenerationConfig::new(&self.config.models.answer)
            .with_temperature(ANSWER_TEMPERATURE)
            .with_max_tokens(ANSWER_MAX_TOKENS);
        let mut messages = prompt::build_answer_messages(context, query.as_str());
        let max_regenerations = self.config.generation.max_regenerations;

        let mut attempt = 0;
        loop {
            tracing::debug!(
                attempt,
                prompt_chars = messages.iter().map(|m| m.content.len()).sum::<usize>(),
                "Generating answer"
            );
            let answer = self.completer.complete(&messages, &options).await?;

            if answer.trim().is_empty() {
                tracing::warn!("Answer model returned empty text");
                break;
            }

            let validation = self.validator.validate(&answer, context);
            if validation.is_grounded() {
                let grounding = if context.is_empty() {
                    GroundingStatus::NoGrounding
                } else if attempt == 0 {
                    GroundingStatus::Verified
                } else {
                    GroundingStatus::Regenerated
                };
                return Ok(Generated {
                    answer: answer.trim().to_string(),
                    citations: validation.cited,
                    grounding,
                });
            }

            let invalid = validation.invalid_labels();
            tracing::warn!(attempt, invalid = ?invalid, "Answer cites articles outside the context");
            if attempt >= max_regenerations {
                break;
            }
            attempt += 1;
            messages.push(ChatMessage::assistant(answer));
            messages.push(prompt::correction_message(&invalid, context));
        }

        let answer = prompt::fallback_answer(context);
        let citations = self.validator.validate(&answer, context).cited;
        let grounding = if context.is_empty() {
            GroundingStatus::NoGrounding
        } else {
            GroundingStatus::Fallback
        };
        tracing::warn!(grounding = ?grounding, "Using safe fallback answer");
        Ok(Generated {
            answer,
            citations,
            grounding,
        })
    }

    /// Run one stage under the timeout, racing the cancellation token.
    async fn guarded<T, F>(
        &self,
        stage: Stage,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage }),
            res = tokio::time::timeout(self.config.timeout(), fut) => {
                res.map_err(|_| PipelineError::Timeout {
                    stage,
                    seconds: self.config.timeout_seconds,
                })
            }
        }
    }

    fn upstream<T>(stage: Stage, result: Result<T, ClientError>) -> Result<T, PipelineError> {
        result.map_err(|source| PipelineError::Upstream { stage, source })
    }

    fn fail(err: PipelineError, trace: &mut Vec<PipelineState>) -> PipelineError {
        trace.push(PipelineState::Failed);
        if err.is_malformed_input() {
            tracing::warn!(error = %err, "Rejected malformed query");
        } else {
            tracing::error!(
                stage = err.stage().map(|s| s.as_str()).unwrap_or("received"),
                trace = ?trace,
                error = %err,
                "Turn failed"
            );
        }
        err
    }
}

//! Query Rewriting Module
//!
//! Rewrites the user's question into a search query for the statute index,
//! using the expanded legal keywords and recent conversation history.

use std::sync::Arc;

use crate::error::ClientError;
use crate::llm::{ChatMessage, Completer, GenerationConfig};
use crate::types::{ExpandedTerms, RewriteSource, RewrittenQuery, UserQuery};

pub(crate) const REWRITE_PROMPT: &str = "Ты — помощник для поиска по российским кодексам. \
Переформулируй вопрос пользователя в поисковый запрос, \
который лучше всего найдёт релевантные статьи кодексов РФ. \
Используй предоставленные юридические ключевые слова. \
Верни ТОЛЬКО переформулированный запрос, без пояснений.";

const MAX_TOKENS: usize = 200;

const ANSWER_LABELS: [&str; 4] = ["Поисковый запрос:", "Запрос:", "Search query:", "Query:"];

/// Stage 2: question + keywords + history to a search query
pub struct QueryRewriter {
    completer: Arc<dyn Completer>,
    model: String,
    history_window: usize,
}

impl QueryRewriter {
    pub fn new(completer: Arc<dyn Completer>, model: impl Into<String>, history_window: usize) -> Self {
        Self {
            completer,
            model: model.into(),
            history_window,
        }
    }

    /// Rewrite the query. Never fails: the question itself is used when the
    /// model is unavailable, answers with nothing, or keyword expansion was
    /// degraded (no call is made in that case).
    pub async fn rewrite(
        &self,
        query: &UserQuery,
        terms: &ExpandedTerms,
        history: &[ChatMessage],
    ) -> RewrittenQuery {
        if terms.is_degraded() {
            tracing::debug!("Keywords unavailable, skipping rewrite");
            return RewrittenQuery::pass_through(query);
        }

        match self.try_rewrite(query, terms, history).await {
            Ok(Some(text)) => {
                tracing::debug!(original = %query, rewritten = %text, "Query rewritten");
                RewrittenQuery {
                    text,
                    source: RewriteSource::Rewritten,
                }
            }
            Ok(None) => {
                tracing::warn!(stage = "rewriting", "Model returned an empty query, using original");
                RewrittenQuery::pass_through(query)
            }
            Err(e) => {
                tracing::warn!(stage = "rewriting", error = %e, "Query rewrite failed, using original");
                RewrittenQuery::pass_through(query)
            }
        }
    }

    async fn try_rewrite(
        &self,
        query: &UserQuery,
        terms: &ExpandedTerms,
        history: &[ChatMessage],
    ) -> Result<Option<String>, ClientError> {
        let messages = [
            ChatMessage::system(REWRITE_PROMPT),
            ChatMessage::user(self.build_user_prompt(query, terms, history)),
        ];
        let options = GenerationConfig::new(&self.model)
            .with_temperature(0.0)
            .with_max_tokens(MAX_TOKENS);

        let raw = self.completer.complete(&messages, &options).await?;
        Ok(clean_rewrite(&raw))
    }

    fn build_user_prompt(&self, query: &UserQuery, terms: &ExpandedTerms, history: &[ChatMessage]) -> String {
        format!(
            "Контекст диалога:\n{}\n\nЮридические ключевые слова: {}\n\nВопрос: {}",
            format_history(history, self.history_window),
            terms.joined(),
            query
        )
    }
}

/// Last `window` non-empty messages as `role: content` lines.
pub fn format_history(history: &[ChatMessage], window: usize) -> String {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| format!("{}: {}", m.role.as_str(), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip labels and quotes the model sometimes wraps the query in.
fn clean_rewrite(raw: &str) -> Option<String> {
    let mut text = raw.trim();

    for label in ANSWER_LABELS {
        if let Some(prefix) = text.get(..label.len()) {
            if prefix.to_lowercase() == label.to_lowercase() {
                text = text[label.len()..].trim_start();
                break;
            }
        }
    }

    let text = text
        .trim_matches(|c: char| c == '"' || c == '«' || c == '»' || c == '\'' || c == '`')
        .trim();

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

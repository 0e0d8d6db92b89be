//! Keyword Expansion
//!
//! Users ask in everyday language ("пьяная езда", "кинули с деньгами") while
//! the codes use legal terminology ("управление в состоянии опьянения",
//! "мошенничество"). A cheap completion maps the question onto 5-10 legal
//! terms that steer the rewrite and the vector search.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ClientError;
use crate::llm::{ChatMessage, Completer, GenerationConfig};
use crate::types::{ExpandedTerms, UserQuery};

pub(crate) const EXPANSION_PROMPT: &str = "Ты — юридический терминолог. Получив бытовой вопрос, \
выведи 5-10 юридических ключевых слов и фраз на русском, \
которые используются в кодексах РФ для описания этой ситуации. \
Формат: слова через запятую, без нумерации и пояснений. \
Пример: вопрос «пьяная езда» → \
управление транспортным средством в состоянии опьянения, \
нетрезвое вождение, медицинское освидетельствование, \
лишение права управления, административное правонарушение";

const MAX_TOKENS: usize = 150;

/// Stage 1: everyday question to legal keywords
pub struct KeywordExpander {
    completer: Arc<dyn Completer>,
    model: String,
    max_terms: usize,
}

impl KeywordExpander {
    pub fn new(completer: Arc<dyn Completer>, model: impl Into<String>, max_terms: usize) -> Self {
        Self {
            completer,
            model: model.into(),
            max_terms: max_terms.max(1),
        }
    }

    /// Expand the question. Never fails: an unavailable model or an
    /// unparseable reply degrades to the question itself.
    pub async fn expand(&self, query: &UserQuery) -> ExpandedTerms {
        match self.try_expand(query).await {
            Ok(terms) if !terms.is_empty() => {
                tracing::debug!(terms = terms.len(), "Keywords expanded");
                ExpandedTerms::new(terms)
            }
            Ok(_) => {
                tracing::warn!(stage = "expanding", "Model returned no usable terms, passing query through");
                ExpandedTerms::pass_through(query)
            }
            Err(e) => {
                tracing::warn!(stage = "expanding", error = %e, "Keyword expansion failed, passing query through");
                ExpandedTerms::pass_through(query)
            }
        }
    }

    async fn try_expand(&self, query: &UserQuery) -> Result<Vec<String>, ClientError> {
        let messages = [
            ChatMessage::system(EXPANSION_PROMPT),
            ChatMessage::user(query.as_str()),
        ];
        let options = GenerationConfig::new(&self.model)
            .with_temperature(0.0)
            .with_max_tokens(MAX_TOKENS);

        let raw = self.completer.complete(&messages, &options).await?;
        Ok(parse_terms(&raw, self.max_terms))
    }
}

/// Split a model reply into clean, unique terms (first occurrence wins).
pub fn parse_terms(raw: &str, max_terms: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();

    for piece in raw.split(|c| c == ',' || c == ';' || c == '\n') {
        let term = clean_term(piece);
        if term.is_empty() {
            continue;
        }
        if seen.insert(term.to_lowercase()) {
            terms.push(term);
        }
        if terms.len() >= max_terms {
            break;
        }
    }
    terms
}

fn clean_term(piece: &str) -> String {
    let mut term = piece.trim();

    // "1.", "2)", "-", "•" list markers
    term = term.trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c == '–');
    let digits = term.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &term[digits..];
        if rest.starts_with('.') || rest.starts_with(')') {
            term = &rest[1..];
        }
    }

    term.trim()
        .trim_matches(|c: char| c == '"' || c == '«' || c == '»' || c == '\'' || c == '`')
        .trim_end_matches('.')
        .trim()
        .to_string()
}

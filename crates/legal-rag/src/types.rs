use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::llm::{ChatMessage, ChatRole};

/// Raw question submitted for one turn. Trimmed and non-empty by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserQuery(String);

impl UserQuery {
    pub fn parse(raw: &str, max_chars: usize) -> Result<Self, PipelineError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(PipelineError::MalformedInput(
                "question is empty".to_string(),
            ));
        }
        let len = text.chars().count();
        if len > max_chars {
            return Err(PipelineError::MalformedInput(format!(
                "question is {} chars, limit is {}",
                len, max_chars
            )));
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Legal keywords produced by the expansion stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandedTerms {
    terms: Vec<String>,
    degraded: bool,
}

impl ExpandedTerms {
    pub fn new(terms: Vec<String>) -> Self {
        Self {
            terms,
            degraded: false,
        }
    }

    /// Expansion failed: carry the question itself forward.
    pub fn pass_through(query: &UserQuery) -> Self {
        Self {
            terms: vec![query.as_str().to_string()],
            degraded: true,
        }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn joined(&self) -> String {
        self.terms.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteSource {
    Rewritten,
    PassThrough,
}

/// Search string handed to retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewrittenQuery {
    pub text: String,
    pub source: RewriteSource,
}

impl RewrittenQuery {
    pub fn pass_through(query: &UserQuery) -> Self {
        Self {
            text: query.as_str().to_string(),
            source: RewriteSource::PassThrough,
        }
    }
}

/// Russian codes present in the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatuteCode {
    Civil,
    Criminal,
    Labour,
    Tax,
    Family,
    Housing,
    Administrative,
}

impl StatuteCode {
    /// Map an ingestion `codex_id` (`gk1`, `nk2`, `koap`, ...) to its code.
    pub fn from_code_id(code_id: &str) -> Option<Self> {
        let id = code_id.trim().to_lowercase();
        if id.starts_with("koap") {
            Some(Self::Administrative)
        } else if id.starts_with("gk") {
            Some(Self::Civil)
        } else if id.starts_with("uk") {
            Some(Self::Criminal)
        } else if id.starts_with("tk") {
            Some(Self::Labour)
        } else if id.starts_with("nk") {
            Some(Self::Tax)
        } else if id.starts_with("sk") {
            Some(Self::Family)
        } else if id.starts_with("jk") || id.starts_with("zhk") {
            Some(Self::Housing)
        } else {
            None
        }
    }

    /// Recognise a code from a citation token: an abbreviation (`ГК`, `GK`,
    /// `КоАП`) or an inflected full name (`Жилищного`, `Трудовой`).
    /// Procedural codes (`Уголовно-процессуального`) are not in the corpus.
    pub fn from_token(token: &str) -> Option<Self> {
        let t = token.trim().trim_matches(|c: char| !c.is_alphanumeric());
        let lower = t.to_lowercase();
        if lower.contains("процессуальн") {
            return None;
        }
        match lower.as_str() {
            "гк" | "gk" => return Some(Self::Civil),
            "ук" | "uk" => return Some(Self::Criminal),
            "тк" | "tk" => return Some(Self::Labour),
            "нк" | "nk" => return Some(Self::Tax),
            "ск" | "sk" => return Some(Self::Family),
            "жк" | "zhk" | "jk" => return Some(Self::Housing),
            "коап" | "koap" => return Some(Self::Administrative),
            _ => {}
        }
        let stems = [
            ("гражданск", Self::Civil),
            ("уголовн", Self::Criminal),
            ("трудов", Self::Labour),
            ("налогов", Self::Tax),
            ("семейн", Self::Family),
            ("жилищн", Self::Housing),
            ("административн", Self::Administrative),
            ("civil", Self::Civil),
            ("criminal", Self::Criminal),
            ("labour", Self::Labour),
            ("labor", Self::Labour),
            ("tax", Self::Tax),
            ("family", Self::Family),
            ("housing", Self::Housing),
            ("administrative", Self::Administrative),
        ];
        stems
            .iter()
            .find(|(stem, _)| lower.starts_with(stem))
            .map(|(_, code)| *code)
    }

    /// Recognise a code from its full display name (`Жилищный кодекс РФ`).
    pub fn from_code_name(name: &str) -> Option<Self> {
        if name.contains("КоАП") {
            return Some(Self::Administrative);
        }
        if name.to_lowercase().contains("процессуальн") {
            return None;
        }
        name.split_whitespace().find_map(Self::from_token)
    }

    pub fn abbreviation(&self) -> &'static str {
        match self {
            Self::Civil => "ГК РФ",
            Self::Criminal => "УК РФ",
            Self::Labour => "ТК РФ",
            Self::Tax => "НК РФ",
            Self::Family => "СК РФ",
            Self::Housing => "ЖК РФ",
            Self::Administrative => "КоАП РФ",
        }
    }
}

/// Strip whitespace and trailing punctuation from an article number (`"209."` → `"209"`).
pub fn normalize_article_number(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| c == '.' || c == ',' || c == ')')
        .to_string()
}

/// One statute article returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub point_id: String,
    pub code_name: String,
    pub code_id: String,
    pub article_number: String,
    pub article_title: String,
    pub chapter: String,
    pub text: String,
    pub url: String,
    pub score: f32,
}

impl RetrievedPassage {
    pub fn code(&self) -> Option<StatuteCode> {
        StatuteCode::from_code_id(&self.code_id)
            .or_else(|| StatuteCode::from_code_name(&self.code_name))
    }

    pub fn article_ref(&self) -> ArticleRef {
        ArticleRef {
            code: self.code(),
            code_id: self.code_id.clone(),
            article_number: normalize_article_number(&self.article_number),
        }
    }

    /// Identity used for de-duplication: the code plus the article number.
    pub fn dedup_key(&self) -> (String, String) {
        let code = if self.code_id.is_empty() {
            self.code_name.to_lowercase()
        } else {
            self.code_id.to_lowercase()
        };
        (code, normalize_article_number(&self.article_number))
    }
}

/// Citation identifier of a statute article.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArticleRef {
    pub code: Option<StatuteCode>,
    pub code_id: String,
    pub article_number: String,
}

impl ArticleRef {
    /// `codex_id:article_num`, the id format of the evaluation datasets.
    pub fn key(&self) -> String {
        format!("{}:{}", self.code_id, self.article_number)
    }
}

impl fmt::Display for ArticleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "ст. {} {}", self.article_number, code.abbreviation()),
            None => write!(f, "ст. {}", self.article_number),
        }
    }
}

/// Passages the answer may be grounded on. Built fresh for every turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Context {
    passages: Vec<RetrievedPassage>,
}

impl Context {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self { passages }
    }

    pub fn passages(&self) -> &[RetrievedPassage] {
        &self.passages
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn article_refs(&self) -> Vec<ArticleRef> {
        self.passages.iter().map(|p| p.article_ref()).collect()
    }

    pub fn into_passages(self) -> Vec<RetrievedPassage> {
        self.passages
    }
}

/// One chat turn as received from the chat layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatTurn {
    pub messages: Vec<ChatMessage>,
}

impl ChatTurn {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// Turn consisting of a single user question.
    pub fn from_question(question: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(question)],
        }
    }

    fn latest_user_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.role == ChatRole::User)
    }

    pub fn latest_user_message(&self) -> Option<&str> {
        self.latest_user_index()
            .map(|i| self.messages[i].content.as_str())
    }

    /// Messages preceding the latest user message, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        match self.latest_user_index() {
            Some(i) => &self.messages[..i],
            None => &self.messages,
        }
    }
}

/// Invocation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Expanding,
    Rewriting,
    Retrieving,
    Generating,
    Completed,
    Failed,
}

/// How the final answer relates to the retrieved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingStatus {
    /// First answer cited only context articles
    Verified,
    /// A later attempt cited only context articles
    Regenerated,
    /// Answers kept citing unknown articles; replaced by a safe message
    Fallback,
    /// Retrieval found nothing; answer states that no statute matched
    NoGrounding,
}

/// Result of a completed invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub request_id: Uuid,
    pub answer: String,
    /// Context articles the answer actually cites
    pub citations: Vec<ArticleRef>,
    pub passages: Vec<RetrievedPassage>,
    pub expanded_terms: ExpandedTerms,
    pub rewritten_query: RewrittenQuery,
    pub grounding: GroundingStatus,
    pub trace: Vec<PipelineState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Answer,
    NoStatuteFound,
    Failed,
}

/// What the chat layer shows for a turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub kind: ReplyKind,
    pub text: String,
    pub citations: Vec<String>,
    pub grounding: Option<GroundingStatus>,
}

impl From<PipelineOutcome> for TurnReply {
    fn from(outcome: PipelineOutcome) -> Self {
        let kind = if outcome.grounding == GroundingStatus::NoGrounding {
            ReplyKind::NoStatuteFound
        } else {
            ReplyKind::Answer
        };
        Self {
            kind,
            text: outcome.answer,
            citations: outcome.citations.iter().map(|c| c.to_string()).collect(),
            grounding: Some(outcome.grounding),
        }
    }
}

impl From<&PipelineError> for TurnReply {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: ReplyKind::Failed,
            text: err.user_message(),
            citations: Vec::new(),
            grounding: None,
        }
    }
}

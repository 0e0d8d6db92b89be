//! Citation Validation Module
//!
//! Validates article citations in generated answers against the passages that
//! were actually retrieved for the turn. Any citation outside the context is a
//! hallucinated reference and must not reach the user.
//!
//! Recognised forms:
//! - noun first: `ст. 209`, `ст 333.28`, `статьи 209, 301 ГК РФ`, `§ 12`, `Article 83 of the Housing Code`
//! - number first: `333.28 статью НК РФ`, `5-я статья`
//! - bare: `333.28 НК РФ`

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::types::{normalize_article_number, ArticleRef, Context, StatuteCode};

static ARTICLE_CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b(?:ст(?:\.|\b)\s*(?:ст(?:\.|\b)\s*)?|стать(?:я|и|е|ю|ёй|ей|ями|ям|ях)\b|статей\b|arts?\.|articles?\b)|§{1,2})\s*(\d+(?:\.\d+)*(?:\s*(?:,|и|and|-|–)\s*\d+(?:\.\d+)*)*)",
    )
    .expect("article citation regex is valid")
});

/// `333.28 статью`, `5-я статья`; group 2 is the ordinal suffix
static NUMBER_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)*)(?:\s*-?\s*(я|ю|й|ей|ой))?\s+(стать(?:я|и|е|ю|ёй|ей))\b")
        .expect("number-first citation regex is valid")
});

/// Number directly followed by a code abbreviation. Case-sensitive on purpose.
static BARE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(\d+(?:\.\d+)*)\s+(ГК|УК|ТК|НК|СК|ЖК|КоАП|ГПК|УПК|АПК|ЗК|БК|ВК|ЛК|ГрК|УИК|КАС|GK|UK|TK|NK|SK|ZhK|KoAP)\b",
    )
    .expect("bare code citation regex is valid")
});

/// Up to three words following a cited number.
static CODE_PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s+(?:of\s+the\s+)?([\p{L}]+(?:-[\p{L}]+)*(?:\s+[\p{L}]+(?:-[\p{L}]+)*){0,2})")
        .expect("code phrase regex is valid")
});

static ARTICLE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)*").expect("article number regex is valid"));

/// Legal acts outside the indexed codes.
const OTHER_ACT_STEMS: &[&str] = &[
    "конституц",
    "конвенц",
    "федеральн",
    "земельн",
    "водн",
    "лесн",
    "бюджетн",
    "градостроительн",
    "арбитражн",
    "воздушн",
    "таможенн",
    "constitution",
    "convention",
    "federal",
    "land",
];

/// Words after a number that denote a structural unit, not an article.
const STRUCTURAL_UNITS: &[&str] = &[
    "ч.", "п.", "пп.", "гл.", "абз.", "разд.", "часть", "части", "частью", "пункт", "пункта",
    "пункте", "глава", "главы", "главе", "раздел", "раздела",
];

/// Code named next to a cited article number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CitedCode {
    /// Nothing recognisable follows the number
    Unspecified,
    Known(StatuteCode),
    /// An act outside the corpus (`ГПК`, `Конституции РФ`, `закона`); never matches a passage
    Other(String),
}

impl CitedCode {
    /// Classify the words following a cited number.
    pub fn classify(phrase: &str) -> Self {
        let words: Vec<&str> = phrase
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
            .filter(|w| !w.is_empty())
            .take_while(|w| !is_citation_word(w))
            .collect();
        let Some(first) = words.first().copied() else {
            return Self::Unspecified;
        };
        let lower = first.to_lowercase();
        let second = words.get(1).map(|w| w.to_lowercase()).unwrap_or_default();
        let label = || words.iter().take(2).copied().collect::<Vec<_>>().join(" ");

        if is_procedural(&lower) {
            return Self::Other(label());
        }
        if let Some(code) = StatuteCode::from_token(first) {
            // `Гражданского процессуального кодекса`, `Civil Procedure Code`
            if is_procedural(&second) {
                return Self::Other(label());
            }
            return Self::Known(code);
        }
        if lower.starts_with("кодекс") {
            let administrative = words
                .iter()
                .any(|w| w.to_lowercase().starts_with("административн"));
            return if administrative {
                Self::Known(StatuteCode::Administrative)
            } else {
                Self::Unspecified
            };
        }
        let other_act = is_code_abbreviation(first)
            || OTHER_ACT_STEMS.iter().any(|stem| lower.starts_with(stem))
            || matches!(
                lower.as_str(),
                "закон" | "закона" | "закону" | "законом" | "законе" | "law"
            );
        if other_act {
            return Self::Other(label());
        }
        Self::Unspecified
    }

    fn label(&self) -> Option<String> {
        match self {
            Self::Unspecified => None,
            Self::Known(code) => Some(code.abbreviation().to_string()),
            Self::Other(name) => Some(name.clone()),
        }
    }
}

fn is_procedural(word: &str) -> bool {
    word.contains("процессуальн") || word.starts_with("procedur")
}

fn is_citation_word(word: &str) -> bool {
    let lower = word.to_lowercase();
    lower == "ст" || lower.starts_with("стать") || lower == "статей" || lower.starts_with("art")
}

/// `ГПК`, `ЗК`, `ГрК`, `КАС`, `ФЗ`: short capitalised token naming a code or law.
fn is_code_abbreviation(token: &str) -> bool {
    if matches!(token, "КАС" | "ФЗ" | "ФКЗ") {
        return true;
    }
    let chars: Vec<char> = token.chars().collect();
    (2..=5).contains(&chars.len())
        && chars.iter().all(|c| c.is_alphabetic())
        && chars[0].is_uppercase()
        && matches!(chars[chars.len() - 1], 'К' | 'K')
}

/// Look past a cited number for the code it belongs to.
fn code_after(answer: &str, pos: usize) -> (CitedCode, usize) {
    let Some(phrase) = CODE_PHRASE_RE
        .captures(&answer[pos..])
        .and_then(|cap| cap.get(1))
    else {
        return (CitedCode::Unspecified, pos);
    };
    match CitedCode::classify(phrase.as_str()) {
        CitedCode::Unspecified => (CitedCode::Unspecified, pos),
        code => (code, pos + phrase.end()),
    }
}

fn follows_structural_unit(before: &str) -> bool {
    before
        .rsplit(char::is_whitespace)
        .find(|w| !w.is_empty())
        .map(|w| STRUCTURAL_UNITS.contains(&w.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn overlaps(spans: &[(usize, usize)], start: usize, end: usize) -> bool {
    spans.iter().any(|&(s, e)| start < e && s < end)
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub confidence: f32,
    pub total_citations: usize,
    pub valid_citations: usize,
    pub invalid_citations: Vec<InvalidCitation>,
    /// Context articles the answer cites, in context order
    pub cited: Vec<ArticleRef>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Every citation points into the context.
    pub fn is_grounded(&self) -> bool {
        self.invalid_citations.is_empty()
    }

    /// Human-readable labels of the offending citations, deduplicated.
    pub fn invalid_labels(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.invalid_citations
            .iter()
            .map(|c| match c.code.label() {
                Some(code) => format!("ст. {} {}", c.article_number, code),
                None => format!("ст. {}", c.article_number),
            })
            .filter(|label| seen.insert(label.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidCitation {
    pub citation_text: String,
    pub article_number: String,
    pub code: CitedCode,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedCitation {
    pub full_text: String,
    pub article_number: String,
    pub code: CitedCode,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Citation validator for generated answers
pub struct CitationValidator {
    /// Enable debug logging
    pub debug: bool,
}

impl CitationValidator {
    pub fn new() -> Self {
        Self { debug: false }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Extract article citations from answer text. A list such as
    /// `статьи 209, 301 ГК` yields one citation per number.
    pub fn extract_citations(&self, answer: &str) -> Vec<ExtractedCitation> {
        let mut citations = Vec::new();
        let mut spans: Vec<(usize, usize)> = Vec::new();

        for cap in ARTICLE_CITATION_RE.captures_iter(answer) {
            let (Some(whole), Some(numbers)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let (code, end) = code_after(answer, whole.end());
            spans.push((whole.start(), whole.end()));
            Self::push_numbers(&mut citations, answer, numbers.as_str(), code, whole.start(), end);
        }

        for cap in NUMBER_FIRST_RE.captures_iter(answer) {
            let (Some(whole), Some(number), Some(noun)) = (cap.get(0), cap.get(1), cap.get(3))
            else {
                continue;
            };
            if overlaps(&spans, whole.start(), whole.end()) {
                continue;
            }
            // `3 статьи` counts articles; only ordinals, singular case forms
            // and dotted numbers name one
            let singular = matches!(
                noun.as_str().to_lowercase().as_str(),
                "статью" | "статье" | "статьей" | "статьёй"
            );
            if cap.get(2).is_none() && !singular && !number.as_str().contains('.') {
                continue;
            }
            let (code, end) = code_after(answer, whole.end());
            spans.push((whole.start(), whole.end()));
            Self::push_numbers(&mut citations, answer, number.as_str(), code, whole.start(), end);
        }

        for cap in BARE_CODE_RE.captures_iter(answer) {
            let (Some(whole), Some(number), Some(abbr)) = (cap.get(0), cap.get(1), cap.get(2)) else {
                continue;
            };
            if overlaps(&spans, whole.start(), whole.end())
                || follows_structural_unit(&answer[..whole.start()])
            {
                continue;
            }
            let code = CitedCode::classify(abbr.as_str());
            spans.push((whole.start(), whole.end()));
            Self::push_numbers(&mut citations, answer, number.as_str(), code, whole.start(), whole.end());
        }

        citations.sort_by_key(|c| c.start_pos);

        if self.debug {
            tracing::debug!(count = citations.len(), "[CitationValidator] Extracted citations");
            for cit in &citations {
                tracing::debug!(citation = %cit.full_text, article = %cit.article_number, "  Citation found");
            }
        }

        citations
    }

    fn push_numbers(
        citations: &mut Vec<ExtractedCitation>,
        answer: &str,
        numbers: &str,
        code: CitedCode,
        start: usize,
        end: usize,
    ) {
        let full_text = answer[start..end].trim().to_string();
        for number in ARTICLE_NUMBER_RE.find_iter(numbers) {
            citations.push(ExtractedCitation {
                full_text: full_text.clone(),
                article_number: normalize_article_number(number.as_str()),
                code: code.clone(),
                start_pos: start,
                end_pos: end,
            });
        }
    }

    /// Validate citations against the retrieved context
    pub fn validate(&self, answer: &str, context: &Context) -> ValidationResult {
        let citations = self.extract_citations(answer);

        if citations.is_empty() {
            return ValidationResult {
                confidence: 1.0, // No citations means nothing to validate
                total_citations: 0,
                valid_citations: 0,
                invalid_citations: Vec::new(),
                cited: Vec::new(),
                warnings: vec!["Answer contains no article citations".to_string()],
            };
        }

        let refs = context.article_refs();
        let mut cited_idx: HashSet<usize> = HashSet::new();
        let mut valid_count = 0;
        let mut invalid_citations = Vec::new();
        let mut warnings = Vec::new();

        for citation in &citations {
            let matched: Vec<usize> = refs
                .iter()
                .enumerate()
                .filter(|(_, r)| Self::matches(citation, r))
                .map(|(i, _)| i)
                .collect();

            if matched.is_empty() {
                let reason = if context.is_empty() {
                    "No articles were retrieved for this question".to_string()
                } else if let CitedCode::Other(act) = &citation.code {
                    format!("{} is not among the indexed codes", act)
                } else {
                    format!("Article {} is not in the retrieved context", citation.article_number)
                };
                warnings.push(format!(
                    "Citation '{}' references an article outside the context",
                    citation.full_text
                ));
                invalid_citations.push(InvalidCitation {
                    citation_text: citation.full_text.clone(),
                    article_number: citation.article_number.clone(),
                    code: citation.code.clone(),
                    reason,
                });
                continue;
            }

            cited_idx.extend(matched);
            valid_count += 1;
        }

        let confidence = valid_count as f32 / citations.len() as f32;

        if confidence < 0.7 {
            warnings.insert(
                0,
                format!(
                    "Low citation confidence ({:.0}%) - answer may contain invented references",
                    confidence * 100.0
                ),
            );
        }

        let cited = refs
            .into_iter()
            .enumerate()
            .filter(|(i, _)| cited_idx.contains(i))
            .map(|(_, r)| r)
            .collect();

        if self.debug {
            tracing::debug!(valid = valid_count, total = citations.len(), confidence_pct = format_args!("{:.2}", confidence * 100.0), "[CitationValidator] Validation complete");
        }

        ValidationResult {
            confidence,
            total_citations: citations.len(),
            valid_citations: valid_count,
            invalid_citations,
            cited,
            warnings,
        }
    }

    /// Same article number; a named code must be the passage's code.
    fn matches(citation: &ExtractedCitation, article: &ArticleRef) -> bool {
        if citation.article_number != article.article_number {
            return false;
        }
        match (&citation.code, article.code) {
            (CitedCode::Other(_), _) => false,
            (CitedCode::Known(cited), Some(actual)) => *cited == actual,
            _ => true,
        }
    }
}

impl Default for CitationValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RetrievedPassage;

    fn passage(code_name: &str, code_id: &str, num: &str) -> RetrievedPassage {
        RetrievedPassage {
            point_id: format!("{}:{}", code_id, num),
            code_name: code_name.into(),
            code_id: code_id.into(),
            article_number: num.into(),
            article_title: String::new(),
            chapter: String::new(),
            text: "...".into(),
            url: String::new(),
            score: 0.8,
        }
    }

    fn civil_context() -> Context {
        Context::new(vec![
            passage("Гражданский кодекс РФ (часть 1)", "gk1", "209"),
            passage("Гражданский кодекс РФ (часть 1)", "gk1", "301"),
        ])
    }

    #[test]
    fn test_extract_simple_citations() {
        let validator = CitationValidator::new();
        let citations = validator.extract_citations(
            "Собственник вправе истребовать имущество (ст. 301 ГК РФ). См. также статья 83 Жилищного кодекса.",
        );
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].article_number, "301");
        assert_eq!(citations[0].code, CitedCode::Known(StatuteCode::Civil));
        assert_eq!(citations[1].article_number, "83");
        assert_eq!(citations[1].code, CitedCode::Known(StatuteCode::Housing));
    }

    #[test]
    fn test_extract_lists_and_dotted_numbers() {
        let validator = CitationValidator::new();
        let citations = validator.extract_citations("Согласно статьям 209, 301 и 302 ГК и ст. 12.8 КоАП.");
        let numbers: Vec<_> = citations.iter().map(|c| c.article_number.as_str()).collect();
        assert_eq!(numbers, vec!["209", "301", "302", "12.8"]);
        assert_eq!(citations[3].code, CitedCode::Known(StatuteCode::Administrative));
    }

    #[test]
    fn test_no_false_positives_in_plain_text() {
        let validator = CitationValidator::new();
        let text = "К сожалению, я не нашёл релевантных статей по вашему вопросу. Текст 5 лет назад.";
        assert!(validator.extract_citations(text).is_empty());
    }

    #[test]
    fn test_validation_with_valid_citations() {
        let validator = CitationValidator::new();
        let result = validator.validate(
            "Права собственника определены в ст. 209 ГК РФ, а виндикация — в ст. 301 ГК РФ.",
            &civil_context(),
        );
        assert!(result.is_grounded());
        assert_eq!(result.total_citations, 2);
        assert_eq!(result.cited.len(), 2);
        assert!(result.confidence > 0.9);
    }

    #[test]
    fn test_validation_with_invented_citation() {
        let validator = CitationValidator::new();
        let result = validator.validate("Применяется ст. 209 ГК РФ и ст. 304 ГК РФ.", &civil_context());
        assert!(!result.is_grounded());
        assert_eq!(result.valid_citations, 1);
        assert_eq!(result.invalid_labels(), vec!["ст. 304 ГК РФ".to_string()]);
    }

    #[test]
    fn test_wrong_code_is_invalid() {
        let validator = CitationValidator::new();
        let result = validator.validate("См. ст. 209 УК РФ.", &civil_context());
        assert!(!result.is_grounded());

        // Unrecognised code words fall back to the number alone
        let result = validator.validate("См. статью 209 кодекса.", &civil_context());
        assert!(result.is_grounded());
    }

    #[test]
    fn test_any_citation_is_invalid_for_empty_context() {
        let validator = CitationValidator::new();
        let result = validator.validate("Смотрите ст. 1 ГК РФ.", &Context::default());
        assert!(!result.is_grounded());
        assert!(result.cited.is_empty());
    }

    fn housing_context() -> Context {
        Context::new(vec![passage("Жилищный кодекс РФ", "jk", "35")])
    }

    #[test]
    fn test_code_outside_corpus_is_invalid() {
        let validator = CitationValidator::new();

        let result = validator.validate("(ст. 209 ГПК РФ)", &civil_context());
        assert!(!result.is_grounded());
        assert!(result.cited.is_empty());
        assert_eq!(result.invalid_labels(), vec!["ст. 209 ГПК РФ".to_string()]);

        let result =
            validator.validate("См. ст. 301 Гражданского процессуального кодекса.", &civil_context());
        assert!(!result.is_grounded());

        let result = validator.validate(
            "Порядок установлен статьей 209 Уголовно-процессуального кодекса.",
            &civil_context(),
        );
        assert!(!result.is_grounded());

        for answer in [
            "Право на жилище закреплено в ст. 35 Конституции РФ.",
            "См. ст. 35 ЗК РФ.",
            "Согласно статье 35 Федерального закона о регистрации.",
        ] {
            let result = validator.validate(answer, &housing_context());
            assert!(!result.is_grounded(), "{}", answer);
            assert!(result.cited.is_empty(), "{}", answer);
        }

        // The matching code is still accepted
        let result = validator.validate("Выселение по ст. 35 Жилищного кодекса РФ.", &housing_context());
        assert!(result.is_grounded());
    }

    #[test]
    fn test_code_classification() {
        assert_eq!(CitedCode::classify("ГК РФ"), CitedCode::Known(StatuteCode::Civil));
        assert_eq!(
            CitedCode::classify("Кодекса об административных"),
            CitedCode::Known(StatuteCode::Administrative)
        );
        assert_eq!(CitedCode::classify("ГрК РФ"), CitedCode::Other("ГрК РФ".to_string()));
        assert!(matches!(CitedCode::classify("Civil Procedure Code"), CitedCode::Other(_)));
        assert_eq!(CitedCode::classify("устанавливает, что"), CitedCode::Unspecified);
        assert_eq!(CitedCode::classify("РФ"), CitedCode::Unspecified);
    }

    #[test]
    fn test_extract_informal_forms() {
        let validator = CitationValidator::new();
        for text in [
            "Пошлина определена ст 333.28 НК РФ.",
            "См. 333.28 статью НК РФ.",
            "Смотрите § 333.28 Налогового кодекса.",
            "Пошлина составляет 333.28 НК РФ.",
        ] {
            let citations = validator.extract_citations(text);
            assert_eq!(citations.len(), 1, "{}", text);
            assert_eq!(citations[0].article_number, "333.28", "{}", text);
            assert_eq!(citations[0].code, CitedCode::Known(StatuteCode::Tax), "{}", text);
        }

        let ordinal = validator.extract_citations("Об этом говорит 35-я статья ЖК.");
        assert_eq!(ordinal.len(), 1);
        assert_eq!(ordinal[0].article_number, "35");
        assert_eq!(ordinal[0].code, CitedCode::Known(StatuteCode::Housing));
    }

    #[test]
    fn test_counts_and_structural_units_are_not_citations() {
        let validator = CitationValidator::new();
        let text = "Найдено 3 статьи по теме; подробности в части 2 ГК РФ и главе 25 НК РФ.";
        assert!(validator.extract_citations(text).is_empty());
    }

    #[test]
    fn test_informal_citation_with_empty_context_is_invalid() {
        let validator = CitationValidator::new();
        for answer in [
            "Пошлина определена ст 333.28 НК РФ.",
            "См. 333.28 статью НК РФ.",
            "Смотрите § 333.28 Налогового кодекса.",
            "Размер пошлины: 333.28 НК РФ.",
        ] {
            let result = validator.validate(answer, &Context::default());
            assert!(!result.is_grounded(), "{}", answer);
        }
    }
}

//! Retrieval and Grounding Evaluation
//!
//! Measures the pipeline against labelled questions:
//! - Article recall: share of expected articles present in the retrieved context
//! - MRR (Mean Reciprocal Rank): average 1/rank of the first expected article
//! - Hit rate: share of questions with at least one expected article retrieved
//! - Hallucination rate: share of answers citing an article outside their context
//!
//! Article ids use the ingestion format `codex_id:article_num` (e.g. `gk1:209`).

use anyhow::{Context as _, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::pipeline::LegalRagPipeline;
use crate::rag::citation_validator::CitationValidator;
use crate::types::{ChatTurn, Context};

/// One labelled question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalQuestion {
    pub question: String,
    /// Article ids that a good retrieval must surface
    #[serde(default)]
    pub expected_articles: Vec<String>,
}

/// Metrics for a single question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionMetrics {
    pub question: String,
    pub expected: Vec<String>,
    pub retrieved: Vec<String>,
    pub recall: f64,
    pub reciprocal_rank: f64,
    /// `None` when no answer was generated (retrieval-only run or failure)
    pub hallucinated: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Aggregated metrics across a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub num_questions: usize,
    pub average_recall: f64,
    /// Questions with recall 1.0
    pub perfect_recall: usize,
    /// Questions with recall 0.0
    pub zero_recall: usize,
    pub mrr: f64,
    pub hit_rate: f64,
    /// Over questions that produced an answer
    pub hallucination_rate: Option<f64>,
    /// Invocations that ended in an error
    pub failures: usize,
    pub per_question: Vec<QuestionMetrics>,
}

/// Load a JSONL dataset, one `EvalQuestion` per non-empty line.
pub fn load_dataset(path: &Path) -> Result<Vec<EvalQuestion>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read eval dataset {}", path.display()))?;

    let mut questions = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let question: EvalQuestion = serde_json::from_str(line)
            .with_context(|| format!("Invalid eval record at line {}", line_no + 1))?;
        questions.push(question);
    }

    tracing::info!(path = %path.display(), questions = questions.len(), "Loaded eval dataset");
    Ok(questions)
}

/// Share of expected ids present in `retrieved`; 1.0 when nothing is expected.
pub fn article_recall(retrieved: &[String], expected: &[String]) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    let retrieved: HashSet<&str> = retrieved.iter().map(|s| s.as_str()).collect();
    let found = expected.iter().filter(|e| retrieved.contains(e.as_str())).count();
    found as f64 / expected.len() as f64
}

/// 1/rank of the first expected id in `retrieved`, 0.0 if none.
pub fn reciprocal_rank(retrieved: &[String], expected: &[String]) -> f64 {
    retrieved
        .iter()
        .position(|id| expected.contains(id))
        .map(|idx| 1.0 / (idx + 1) as f64)
        .unwrap_or(0.0)
}

/// Share of answers that cite at least one article outside their context.
pub fn hallucination_rate(answers: &[(String, Context)]) -> f64 {
    if answers.is_empty() {
        return 0.0;
    }
    let validator = CitationValidator::new();
    let hallucinated = answers
        .iter()
        .filter(|(answer, context)| !validator.validate(answer, context).is_grounded())
        .count();
    hallucinated as f64 / answers.len() as f64
}

/// Retrieval-only evaluation. `retrieve_fn` returns ranked article ids.
pub fn evaluate<F>(questions: &[EvalQuestion], mut retrieve_fn: F) -> EvalSummary
where
    F: FnMut(&EvalQuestion) -> Vec<String>,
{
    let per_question = questions
        .iter()
        .map(|q| {
            let retrieved = retrieve_fn(q);
            score_question(q, retrieved, None, None)
        })
        .collect();
    summarize(per_question)
}

/// Run the full pipeline over the dataset with at most `concurrency`
/// invocations in flight.
pub async fn run_pipeline_eval(
    pipeline: &LegalRagPipeline,
    questions: &[EvalQuestion],
    concurrency: usize,
) -> EvalSummary {
    let validator = CitationValidator::new();

    let mut per_question: Vec<(usize, QuestionMetrics)> = stream::iter(questions.iter().enumerate())
        .map(|(idx, q)| {
            let validator = &validator;
            async move {
                let turn = ChatTurn::from_question(q.question.clone());
                let metrics = match pipeline.answer(&turn).await {
                    Ok(outcome) => {
                        let retrieved: Vec<String> =
                            outcome.passages.iter().map(|p| p.article_ref().key()).collect();
                        let context = Context::new(outcome.passages.clone());
                        let grounded = validator.validate(&outcome.answer, &context).is_grounded();
                        score_question(q, retrieved, Some(!grounded), None)
                    }
                    Err(e) => {
                        tracing::warn!(question = %q.question, error = %e, "Eval invocation failed");
                        score_question(q, Vec::new(), None, Some(e.to_string()))
                    }
                };
                (idx, metrics)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    // Restore dataset order
    per_question.sort_by_key(|(idx, _)| *idx);
    summarize(per_question.into_iter().map(|(_, m)| m).collect())
}

/// Search with the raw question only, skipping the LLM stages. This is the
/// retrieval baseline the full pipeline is compared against.
pub async fn run_retrieval_eval(
    pipeline: &LegalRagPipeline,
    questions: &[EvalQuestion],
    concurrency: usize,
) -> EvalSummary {
    let mut per_question: Vec<(usize, QuestionMetrics)> = stream::iter(questions.iter().enumerate())
        .map(|(idx, q)| async move {
            let metrics = match pipeline.retrieve(&q.question).await {
                Ok(context) => {
                    let retrieved = context.article_refs().iter().map(|r| r.key()).collect();
                    score_question(q, retrieved, None, None)
                }
                Err(e) => {
                    tracing::warn!(question = %q.question, error = %e, "Eval retrieval failed");
                    score_question(q, Vec::new(), None, Some(e.to_string()))
                }
            };
            (idx, metrics)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    per_question.sort_by_key(|(idx, _)| *idx);
    summarize(per_question.into_iter().map(|(_, m)| m).collect())
}

fn score_question(
    question: &EvalQuestion,
    retrieved: Vec<String>,
    hallucinated: Option<bool>,
    error: Option<String>,
) -> QuestionMetrics {
    QuestionMetrics {
        question: question.question.clone(),
        expected: question.expected_articles.clone(),
        recall: article_recall(&retrieved, &question.expected_articles),
        reciprocal_rank: reciprocal_rank(&retrieved, &question.expected_articles),
        retrieved,
        hallucinated,
        error,
    }
}

fn summarize(per_question: Vec<QuestionMetrics>) -> EvalSummary {
    let n = per_question.len().max(1) as f64;

    let answered: Vec<bool> = per_question.iter().filter_map(|q| q.hallucinated).collect();
    let hallucination_rate = if answered.is_empty() {
        None
    } else {
        Some(answered.iter().filter(|h| **h).count() as f64 / answered.len() as f64)
    };

    EvalSummary {
        num_questions: per_question.len(),
        average_recall: per_question.iter().map(|q| q.recall).sum::<f64>() / n,
        perfect_recall: per_question.iter().filter(|q| q.recall >= 1.0).count(),
        zero_recall: per_question.iter().filter(|q| q.recall == 0.0).count(),
        mrr: per_question.iter().map(|q| q.reciprocal_rank).sum::<f64>() / n,
        hit_rate: per_question.iter().filter(|q| q.reciprocal_rank > 0.0).count() as f64 / n,
        hallucination_rate,
        failures: per_question.iter().filter(|q| q.error.is_some()).count(),
        per_question,
    }
}

/// Format evaluation metrics as a human-readable report.
pub fn format_report(summary: &EvalSummary) -> String {
    let mut report = String::new();

    report.push_str(&format!(
        "=== Legal RAG Evaluation Report ({} questions) ===\n\n",
        summary.num_questions
    ));
    report.push_str(&format!("Avg Article Recall: {:.2}%\n", summary.average_recall * 100.0));
    report.push_str(&format!("Perfect Recall (100%): {}\n", summary.perfect_recall));
    report.push_str(&format!("Zero Recall (0%): {}\n", summary.zero_recall));
    report.push_str(&format!("MRR: {:.4}\n", summary.mrr));
    report.push_str(&format!("Hit Rate: {:.4}\n", summary.hit_rate));
    if let Some(rate) = summary.hallucination_rate {
        report.push_str(&format!("Hallucination Rate: {:.2}%\n", rate * 100.0));
    }
    if summary.failures > 0 {
        report.push_str(&format!("Failed invocations: {}\n", summary.failures));
    }

    let missed: Vec<&QuestionMetrics> = summary
        .per_question
        .iter()
        .filter(|q| q.recall < 1.0)
        .collect();

    if !missed.is_empty() {
        report.push_str(&format!(
            "\n--- Incomplete recall ({}/{}) ---\n",
            missed.len(),
            summary.num_questions
        ));
        for q in &missed {
            report.push_str(&format!(
                "  - \"{}\" recall={:.2} expected={:?}\n",
                q.question, q.recall, q.expected
            ));
        }
    }

    report
}

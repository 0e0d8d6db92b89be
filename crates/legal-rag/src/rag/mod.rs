//! RAG stages - keyword expansion, query rewriting, retrieval, answer prompting,
//! citation validation and evaluation metrics

pub mod citation_validator;
pub mod eval;
pub mod keyword_expander;
pub mod prompt;
pub mod query_rewriter;
pub mod retriever;

// Re-export commonly used types
pub use citation_validator::{CitationValidator, CitedCode, ValidationResult};
pub use eval::{
    article_recall, evaluate, format_report, hallucination_rate, load_dataset, run_pipeline_eval,
    run_retrieval_eval, EvalQuestion, EvalSummary, QuestionMetrics,
};
pub use keyword_expander::KeywordExpander;
pub use query_rewriter::QueryRewriter;
pub use retriever::Retriever;

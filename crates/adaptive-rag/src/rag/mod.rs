//! Pipeline stages. Every validation stage implements [`Validator`] so the
//! orchestrator drives them through one code path.

pub mod control;
pub mod coverage;
pub mod fallback;
pub mod final_check;
pub mod generator;
pub mod hallucination;
mod judge;
pub mod query_analyzer;
pub mod relevance;
pub mod retrieval_grader;
pub mod retriever;
pub mod safety;
pub mod scorer;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::trace::Step;
use crate::types::{GateVerdict, GeneratedAnswer, QueryContext, RetrievedChunk};

pub use control::decide_strategy;
pub use coverage::CoverageGuard;
pub use fallback::{FallbackAgent, FallbackReason, FALLBACK_DISCLAIMER};
pub use final_check::FinalChecker;
pub use generator::Generator;
pub use hallucination::HallucinationChecker;
pub use query_analyzer::QueryAnalyzer;
pub use relevance::RelevanceGate;
pub use retrieval_grader::RetrievalGrader;
pub use retriever::Retriever;
pub use safety::SafetyValidator;
pub use scorer::SimilarityScorer;

/// How the orchestrator reacts when a validator rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Route straight to fallback, no retry spent.
    Terminal,
    /// Failure is corrected inside the cycle; the pipeline carries on.
    Absorbed,
    /// Spend one unit of the retry budget.
    Retryable,
}

/// Result of running one stage, as seen by the orchestrator loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Proceed,
    /// Carries the feedback hint handed to the next analysis.
    Retry(String),
    Terminal(FallbackReason),
}

impl StageOutcome {
    pub fn from_verdict(
        class: FailureClass,
        retry_hint: Option<&str>,
        verdict: &GateVerdict,
    ) -> Self {
        if verdict.passed {
            return Self::Proceed;
        }
        match class {
            FailureClass::Terminal => Self::Terminal(FallbackReason::OutOfDomain),
            FailureClass::Absorbed => Self::Proceed,
            FailureClass::Retryable => {
                Self::Retry(retry_hint.unwrap_or(verdict.reason.as_str()).to_string())
            }
        }
    }

    /// Collaborator errors: retryable ones (timeouts, malformed output) only
    /// cost a retry when the stage itself is retryable; everything else is an
    /// operational failure of the request.
    pub fn from_error(class: FailureClass, error: &ServiceError) -> Self {
        match class {
            FailureClass::Absorbed => Self::Proceed,
            FailureClass::Retryable if error.is_retryable() => {
                Self::Retry(format!("Previous attempt failed with {}.", error.kind()))
            }
            _ => Self::Terminal(FallbackReason::Operational(error.kind().to_string())),
        }
    }
}

/// Everything a validator may look at. Which fields matter depends on the
/// stage; the answer is only present after generation.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub query: &'a QueryContext,
    pub chunks: &'a [RetrievedChunk],
    pub answer: Option<&'a GeneratedAnswer>,
}

impl<'a> StageInput<'a> {
    pub fn query_only(query: &'a QueryContext) -> Self {
        Self {
            query,
            chunks: &[],
            answer: None,
        }
    }

    pub fn with_chunks(query: &'a QueryContext, chunks: &'a [RetrievedChunk]) -> Self {
        Self {
            query,
            chunks,
            answer: None,
        }
    }

    pub fn with_answer(
        query: &'a QueryContext,
        chunks: &'a [RetrievedChunk],
        answer: &'a GeneratedAnswer,
    ) -> Self {
        Self {
            query,
            chunks,
            answer: Some(answer),
        }
    }
}

/// A stage that emits a pass/fail verdict.
#[async_trait]
pub trait Validator: Send + Sync {
    fn step(&self) -> Step;

    fn failure_class(&self) -> FailureClass;

    /// Feedback for the analyzer when this stage forces a retry.
    fn retry_hint(&self) -> Option<&'static str> {
        None
    }

    async fn evaluate(&self, input: &StageInput<'_>) -> Result<GateVerdict, ServiceError>;
}

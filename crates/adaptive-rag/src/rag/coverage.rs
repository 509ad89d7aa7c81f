use async_trait::async_trait;
use std::sync::Arc;

use super::{FailureClass, StageInput, Validator};
use crate::error::ServiceError;
use crate::knowledge_base::KnowledgeBase;
use crate::trace::Step;
use crate::types::GateVerdict;

pub const COVERAGE_HINT: &str =
    "Knowledge Base has no strong match for this specific medical subdomain.";

/// Cheap numeric pre-filter in front of the retrieval grader: at least one
/// chunk must clear `threshold` against the effective query.
pub struct CoverageGuard {
    kb: Arc<KnowledgeBase>,
    threshold: f32,
    max_chars: usize,
}

impl CoverageGuard {
    pub fn new(kb: Arc<KnowledgeBase>, threshold: f32, max_chars: usize) -> Self {
        Self {
            kb,
            threshold,
            max_chars: max_chars.max(1),
        }
    }
}

#[async_trait]
impl Validator for CoverageGuard {
    fn step(&self) -> Step {
        Step::CoverageGuard
    }

    fn failure_class(&self) -> FailureClass {
        FailureClass::Retryable
    }

    fn retry_hint(&self) -> Option<&'static str> {
        Some(COVERAGE_HINT)
    }

    async fn evaluate(&self, input: &StageInput<'_>) -> Result<GateVerdict, ServiceError> {
        let texts: Vec<String> = input
            .chunks
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .map(|c| c.text.chars().take(self.max_chars).collect())
            .collect();

        let query = input.query.effective_query();
        let Some(best) = self.kb.scorer().max_score(query, texts).await? else {
            return Ok(GateVerdict::fail(0.0, "no_chunks"));
        };

        tracing::debug!(best, threshold = self.threshold, "Coverage scored");
        Ok(if best >= self.threshold {
            GateVerdict::pass(best, "covered")
        } else {
            GateVerdict::fail(best, "weak_match")
        })
    }
}

use async_trait::async_trait;
use std::sync::Arc;

use super::{FailureClass, StageInput, Validator};
use crate::error::ServiceError;
use crate::knowledge_base::KnowledgeBase;
use crate::trace::Step;
use crate::types::GateVerdict;

/// Domain filter: embedding similarity of the raw query to the domain
/// reference. Rejection is terminal.
pub struct RelevanceGate {
    kb: Arc<KnowledgeBase>,
    threshold: f32,
}

impl RelevanceGate {
    pub fn new(kb: Arc<KnowledgeBase>, threshold: f32) -> Self {
        Self { kb, threshold }
    }
}

#[async_trait]
impl Validator for RelevanceGate {
    fn step(&self) -> Step {
        Step::RelevanceGate
    }

    fn failure_class(&self) -> FailureClass {
        FailureClass::Terminal
    }

    async fn evaluate(&self, input: &StageInput<'_>) -> Result<GateVerdict, ServiceError> {
        let raw = input.query.raw_query();
        if raw.trim().is_empty() {
            return Ok(GateVerdict::fail(0.0, "out_of_domain"));
        }

        let score = self
            .kb
            .scorer()
            .score_against(raw, &self.kb.domain().vector)
            .await?;

        tracing::debug!(score, threshold = self.threshold, "Domain relevance scored");
        Ok(if score >= self.threshold {
            GateVerdict::pass(score, "in_domain")
        } else {
            GateVerdict::fail(score, "out_of_domain")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_kb;
    use crate::types::QueryContext;

    #[tokio::test]
    async fn test_in_domain_query_passes() {
        let gate = RelevanceGate::new(test_kb(&[]), 0.1);
        let ctx = QueryContext::new("How does antibiotic resistance develop?");
        let verdict = gate.evaluate(&StageInput::query_only(&ctx)).await.unwrap();
        assert!(verdict.passed);
        assert!(verdict.score >= 0.1);
    }

    #[tokio::test]
    async fn test_off_topic_query_fails() {
        let gate = RelevanceGate::new(test_kb(&[]), 0.1);
        let ctx = QueryContext::new("How do I bake a sourdough loaf?");
        let verdict = gate.evaluate(&StageInput::query_only(&ctx)).await.unwrap();
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, "out_of_domain");
    }

    #[tokio::test]
    async fn test_blank_query_fails_without_scoring() {
        let gate = RelevanceGate::new(test_kb(&[]), 0.0);
        let ctx = QueryContext::new("   ");
        let verdict = gate.evaluate(&StageInput::query_only(&ctx)).await.unwrap();
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0.0);
    }
}

use async_trait::async_trait;
use std::sync::Arc;

use super::judge::{format_chunks, parse_binary};
use super::{FailureClass, StageInput, Validator};
use crate::error::ServiceError;
use crate::llm::{CompletionOptions, CompletionService};
use crate::trace::Step;
use crate::types::GateVerdict;

pub const GRADER_INSTRUCTION: &str = "You grade retrieved guideline excerpts. \
Decide whether the context contains information sufficient to answer the query. \
Output GOOD or BAD.";

pub const GRADER_HINT: &str = "Retrieved documents were irrelevant.";

pub struct RetrievalGrader {
    llm: Arc<dyn CompletionService>,
}

impl RetrievalGrader {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Validator for RetrievalGrader {
    fn step(&self) -> Step {
        Step::RetrievalGrading
    }

    fn failure_class(&self) -> FailureClass {
        FailureClass::Retryable
    }

    fn retry_hint(&self) -> Option<&'static str> {
        Some(GRADER_HINT)
    }

    async fn evaluate(&self, input: &StageInput<'_>) -> Result<GateVerdict, ServiceError> {
        let prompt = format!(
            "Query: {}\nContext:\n{}\nRelevant? Output GOOD or BAD.",
            input.query.effective_query(),
            format_chunks(input.chunks)
        );
        let response = self
            .llm
            .complete(GRADER_INSTRUCTION, &prompt, &CompletionOptions::verdict())
            .await?;

        Ok(match parse_binary(&response, "GOOD", "BAD") {
            Some(true) => GateVerdict::pass(1.0, "relevant"),
            Some(false) => GateVerdict::fail(0.0, "irrelevant"),
            None => GateVerdict::fail(0.0, "unparseable_verdict"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;
    use crate::types::{QueryContext, RetrievedChunk};

    fn chunks() -> Vec<RetrievedChunk> {
        vec![RetrievedChunk {
            text: "Beta-lactamases hydrolyse penicillin.".into(),
            source_id: "who#3".into(),
            source: "who.pdf".into(),
            similarity_score: 0.8,
        }]
    }

    async fn grade(reply: &str) -> GateVerdict {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push("grade", Ok(reply.to_string()));
        let grader = RetrievalGrader::new(llm);
        let ctx = QueryContext::new("how does penicillin resistance work");
        let chunks = chunks();
        grader
            .evaluate(&StageInput::with_chunks(&ctx, &chunks))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_good_passes() {
        assert!(grade("GOOD").await.passed);
        assert!(grade("good - the excerpt explains it").await.passed);
    }

    #[tokio::test]
    async fn test_bad_and_garbage_fail() {
        assert_eq!(grade("BAD").await.reason, "irrelevant");
        assert_eq!(grade("maybe").await.reason, "unparseable_verdict");
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push("grade", Err(ServiceError::Malformed("html".into())));
        let grader = RetrievalGrader::new(llm);
        let ctx = QueryContext::new("q");
        let err = grader
            .evaluate(&StageInput::query_only(&ctx))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

use async_trait::async_trait;
use std::sync::Arc;

use super::judge::{format_chunks, parse_binary};
use super::{FailureClass, StageInput, Validator};
use crate::error::ServiceError;
use crate::llm::{CompletionOptions, CompletionService};
use crate::trace::Step;
use crate::types::GateVerdict;

pub const HALLUCINATION_INSTRUCTION: &str = "You check answers for unsupported claims. \
Every factual claim in the answer must be stated in or directly entailed by the context. \
Doses, drug names and numbers not present in the context are unsupported. \
Output YES if there are unsupported claims, otherwise NO.";

pub const HALLUCINATION_HINT: &str =
    "Answer contained claims not supported by the retrieved guidelines.";

pub struct HallucinationChecker {
    llm: Arc<dyn CompletionService>,
}

impl HallucinationChecker {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Validator for HallucinationChecker {
    fn step(&self) -> Step {
        Step::HallucinationCheck
    }

    fn failure_class(&self) -> FailureClass {
        FailureClass::Retryable
    }

    fn retry_hint(&self) -> Option<&'static str> {
        Some(HALLUCINATION_HINT)
    }

    async fn evaluate(&self, input: &StageInput<'_>) -> Result<GateVerdict, ServiceError> {
        let Some(answer) = input.answer else {
            return Ok(GateVerdict::fail(0.0, "no_answer"));
        };

        let prompt = format!(
            "Context:\n{}\nAnswer: {}\nUnsupported claims? Output YES or NO.",
            format_chunks(input.chunks),
            answer.text
        );
        let response = self
            .llm
            .complete(HALLUCINATION_INSTRUCTION, &prompt, &CompletionOptions::verdict())
            .await?;

        // YES means the judge found unsupported claims.
        Ok(match parse_binary(&response, "YES", "NO") {
            Some(false) => GateVerdict::pass(1.0, "grounded"),
            Some(true) => GateVerdict::fail(0.0, "unsupported_claims"),
            None => GateVerdict::fail(0.0, "unparseable_verdict"),
        })
    }
}

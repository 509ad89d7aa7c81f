use async_trait::async_trait;
use std::sync::Arc;

use super::judge::parse_binary;
use super::{FailureClass, StageInput, Validator};
use crate::error::ServiceError;
use crate::llm::{CompletionOptions, CompletionService};
use crate::trace::Step;
use crate::types::GateVerdict;

pub const FINAL_INSTRUCTION: &str = "You check whether an answer addresses the user's question. \
Judge against the question exactly as the user asked it. Output YES or NO.";

pub const FINAL_HINT: &str = "Answer missed intent.";

/// Judges the answer against the raw query, not the rewrite.
pub struct FinalChecker {
    llm: Arc<dyn CompletionService>,
}

impl FinalChecker {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Validator for FinalChecker {
    fn step(&self) -> Step {
        Step::FinalCheck
    }

    fn failure_class(&self) -> FailureClass {
        FailureClass::Retryable
    }

    fn retry_hint(&self) -> Option<&'static str> {
        Some(FINAL_HINT)
    }

    async fn evaluate(&self, input: &StageInput<'_>) -> Result<GateVerdict, ServiceError> {
        let Some(answer) = input.answer else {
            return Ok(GateVerdict::fail(0.0, "no_answer"));
        };

        let prompt = format!(
            "Query: {}\nAnswer: {}\nDoes it answer? Output YES or NO.",
            input.query.raw_query(),
            answer.text
        );
        let response = self
            .llm
            .complete(FINAL_INSTRUCTION, &prompt, &CompletionOptions::verdict())
            .await?;

        Ok(match parse_binary(&response, "YES", "NO") {
            Some(true) => GateVerdict::pass(1.0, "answers_query"),
            Some(false) => GateVerdict::fail(0.0, "missed_intent"),
            None => GateVerdict::fail(0.0, "unparseable_verdict"),
        })
    }
}

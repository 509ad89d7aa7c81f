use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

use super::control::is_identical_rewrite;
use super::judge::extract_json_object;
use super::{FailureClass, StageInput, Validator};
use crate::error::ServiceError;
use crate::llm::{CompletionOptions, CompletionService};
use crate::trace::Step;
use crate::types::GateVerdict;

pub const SAFETY_INSTRUCTION: &str = r#"You are a query rewrite validator.
Compare the original query with its rewrite. Check for ADDED entities (drugs, doses, organisms, populations), CHANGED constraints, or HALLUCINATED specificity.
Output JSON only: { "risk_level": "low" | "medium" | "high" }"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

static RISK_LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)risk_level"?\s*[:=]\s*"?(low|medium|high)"#)
        .expect("risk level regex is valid")
});

#[derive(Deserialize)]
struct RiskResponse {
    risk_level: String,
}

fn parse_risk(response: &str) -> Option<RiskLevel> {
    if let Ok(parsed) = serde_json::from_str::<RiskResponse>(extract_json_object(response)) {
        return RiskLevel::parse(&parsed.risk_level);
    }

    // Lenient parse for near-JSON output
    RISK_LEVEL_RE
        .captures(response)
        .and_then(|caps| caps.get(1))
        .and_then(|m| RiskLevel::parse(m.as_str()))
}

/// Checks the rewrite against the raw query. A failure never aborts the
/// cycle; the control node falls back to the raw query instead.
pub struct SafetyValidator {
    llm: Arc<dyn CompletionService>,
}

impl SafetyValidator {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Validator for SafetyValidator {
    fn step(&self) -> Step {
        Step::SafetyValidation
    }

    fn failure_class(&self) -> FailureClass {
        FailureClass::Absorbed
    }

    async fn evaluate(&self, input: &StageInput<'_>) -> Result<GateVerdict, ServiceError> {
        let original = input.query.raw_query();
        let rewritten = input.query.rewritten_query.as_deref().unwrap_or(original);

        if is_identical_rewrite(original, rewritten) {
            return Ok(GateVerdict::pass(1.0, "identical"));
        }

        let response = self
            .llm
            .complete(
                SAFETY_INSTRUCTION,
                &format!("Original: {}\nRewritten: {}", original, rewritten),
                &CompletionOptions::structured(),
            )
            .await?;

        Ok(match parse_risk(&response) {
            Some(RiskLevel::Low) => GateVerdict::pass(1.0, "risk_level=low"),
            Some(risk) => {
                let score = if risk == RiskLevel::Medium { 0.5 } else { 0.0 };
                GateVerdict::fail(score, format!("risk_level={}", risk.label()))
            }
            None => {
                tracing::warn!("Unparseable safety verdict, keeping original query");
                GateVerdict::fail(0.0, "unparseable_risk")
            }
        })
    }
}

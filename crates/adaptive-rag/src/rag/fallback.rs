use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::with_timeout;
use crate::llm::{CompletionOptions, CompletionService};
use crate::types::{GeneratedAnswer, Tone};

pub const FALLBACK_DISCLAIMER: &str =
    "⚠️ There is no relevant data available in the current medical knowledge base.";

pub const FALLBACK_INSTRUCTION: &str = r#"You are a medical education assistant operating in STRICT TRANSPARENCY MODE.

RULES:
- The system has NO relevant data in its local medical knowledge base.
- You MUST explicitly disclose this limitation to the user.
- You may ONLY provide general, high-level educational information.
- You MUST NOT claim guideline support, studies, or evidence.
- You MUST NOT give prescriptions, dosages, or treatment plans.
- You MUST NOT claim to be a doctor or medical professional.

MANDATORY OUTPUT STRUCTURE:
1. A clear upfront disclosure: "⚠️ There is no relevant data available in the current medical knowledge base."
2. A reassurance sentence explaining that you can still offer general educational information.
3. A safe, general explanation related to the question, avoiding numbers, protocols and certainty.
4. A closing safety note encouraging the user to consult a qualified healthcare professional.

STYLE: match the provided tone and category; calm, educational and transparent.
DO NOT output JSON, mention retrieval or internal processing, or cite sources."#;

const OUT_OF_SCOPE_TEXT: &str = "This assistant only answers questions about antibiotic use, \
antimicrobial resistance and related clinical guidelines, so it cannot help with this question. \
Please rephrase it within that scope, or consult a suitable source for other topics.";

const STATIC_FALLBACK_TEXT: &str = "I can't provide a knowledge-base-backed answer to this \
question right now. General information is no substitute for individual advice, so please \
consult a qualified healthcare professional about your situation.";

/// Why a request ended in fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    /// Relevance gate rejected the query.
    OutOfDomain,
    /// The analyzer's output could not be parsed; treated like out-of-domain.
    AnalysisRejected,
    /// Retry budget spent without a verified answer.
    Exhausted,
    /// A collaborator failed in a way retries cannot fix.
    Operational(String),
}

impl FallbackReason {
    /// Scope refusals are answered statically without a model call.
    fn is_scope_refusal(&self) -> bool {
        matches!(self, Self::OutOfDomain | Self::AnalysisRejected)
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfDomain => f.write_str("out_of_domain"),
            Self::AnalysisRejected => f.write_str("analysis_rejected"),
            Self::Exhausted => f.write_str("retries_exhausted"),
            Self::Operational(kind) => write!(f, "operational:{}", kind),
        }
    }
}

/// Produces a disclaimed answer that never cites the knowledge base. Never
/// fails and is never retried.
pub struct FallbackAgent {
    llm: Arc<dyn CompletionService>,
}

impl FallbackAgent {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub async fn respond(
        &self,
        raw_query: &str,
        category: &str,
        tone: Tone,
        reason: &FallbackReason,
        timeout: Duration,
    ) -> GeneratedAnswer {
        if reason.is_scope_refusal() {
            return GeneratedAnswer::fallback(with_disclaimer(OUT_OF_SCOPE_TEXT), tone);
        }

        let input = format!(
            "Category: {}\nTone: {}\nQuestion: {}",
            category,
            tone.label(),
            raw_query
        );
        let options = CompletionOptions {
            temperature: Some(0.3),
            max_tokens: None,
        };

        let call = self.llm.complete(FALLBACK_INSTRUCTION, &input, &options);
        let text = match with_timeout("fallback", timeout, call).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!("Fallback generation returned empty text, using static answer");
                STATIC_FALLBACK_TEXT.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fallback generation failed, using static answer");
                STATIC_FALLBACK_TEXT.to_string()
            }
        };

        GeneratedAnswer::fallback(with_disclaimer(&text), tone)
    }
}

fn with_disclaimer(text: &str) -> String {
    let text = text.trim();
    if text.starts_with(FALLBACK_DISCLAIMER) {
        text.to_string()
    } else {
        format!("{}\n\n{}", FALLBACK_DISCLAIMER, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::testing::ScriptedLlm;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_out_of_domain_skips_model() {
        let llm = Arc::new(ScriptedLlm::new());
        let agent = FallbackAgent::new(llm.clone());
        let answer = agent
            .respond("bake bread", "General", Tone::SimplifiedEducational, &FallbackReason::OutOfDomain, TIMEOUT)
            .await;

        assert!(answer.is_fallback);
        assert!(answer.source_chunk_ids.is_empty());
        assert!(answer.text.starts_with(FALLBACK_DISCLAIMER));
        assert_eq!(llm.calls("fallback"), 0);
    }

    #[tokio::test]
    async fn test_exhausted_prepends_missing_disclaimer() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push("fallback", Ok("General info about resistance.".into()));
        let agent = FallbackAgent::new(llm.clone());
        let answer = agent
            .respond("q", "Resistance Mechanism", Tone::StructuredClinical, &FallbackReason::Exhausted, TIMEOUT)
            .await;

        assert_eq!(
            answer.text,
            format!("{}\n\nGeneral info about resistance.", FALLBACK_DISCLAIMER)
        );
        assert_eq!(answer.tone_applied, Tone::StructuredClinical);
        assert_eq!(
            llm.inputs("fallback"),
            vec!["Category: Resistance Mechanism\nTone: Structured Clinical\nQuestion: q"]
        );
    }

    #[tokio::test]
    async fn test_existing_disclaimer_not_duplicated() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push("fallback", Ok(format!("{} More text.", FALLBACK_DISCLAIMER)));
        let agent = FallbackAgent::new(llm);
        let answer = agent
            .respond("q", "General", Tone::SimplifiedEducational, &FallbackReason::Exhausted, TIMEOUT)
            .await;
        assert_eq!(answer.text.matches(FALLBACK_DISCLAIMER).count(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_uses_static_text() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push("fallback", Err(ServiceError::RateLimited { attempts: 3 }));
        let agent = FallbackAgent::new(llm);
        let answer = agent
            .respond(
                "q",
                "General",
                Tone::SimplifiedEducational,
                &FallbackReason::Operational("rate_limited".into()),
                TIMEOUT,
            )
            .await;
        assert!(answer.text.starts_with(FALLBACK_DISCLAIMER));
        assert!(answer.text.contains("qualified healthcare professional"));
        assert!(answer.is_fallback);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(FallbackReason::Exhausted.to_string(), "retries_exhausted");
        assert_eq!(
            FallbackReason::Operational("empty_index".into()).to_string(),
            "operational:empty_index"
        );
    }
}

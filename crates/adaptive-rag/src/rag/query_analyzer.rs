use serde::Deserialize;
use std::sync::Arc;

use super::judge::extract_json_object;
use crate::error::ServiceError;
use crate::llm::{CompletionOptions, CompletionService};
use crate::types::{AnalysisResult, Tone};

pub const ANALYSIS_INSTRUCTION: &str = r#"You are a query analysis and restructuring engine for an adaptive retrieval system over medical guidelines.
CRITICAL RULES:
- Query rewriting MUST be LOSSLESS.
- Do NOT add entities, drugs, doses, datasets, years, domains, or assumptions.
- If the input ends with "(Fix: ...)", use that feedback to improve the rewrite; never copy it into the rewrite.
- Output VALID JSON ONLY.

REQUIRED JSON OUTPUT CONTRACT:
{
  "intent": "<one sentence describing what the user wants to know>",
  "category": "<Infection Context Explanation|Antibiotic Class Reasoning|Resistance Mechanism|Stewardship Principle|Safety / Adverse Effects|Guideline Explanation>",
  "answer_tone": "<Simplified Educational|Structured Clinical>",
  "rewritten_query": "...",
  "rewrite_rationale": "..."
}"#;

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    intent: Option<String>,
    category: Option<String>,
    answer_tone: Option<String>,
    rewritten_query: Option<String>,
    #[serde(default)]
    rewrite_rationale: Option<String>,
}

pub struct QueryAnalyzer {
    llm: Arc<dyn CompletionService>,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    /// One completion call, no internal retries. Unparseable output is
    /// returned as `Malformed`.
    pub async fn analyze(
        &self,
        raw_query: &str,
        feedback: Option<&str>,
    ) -> Result<AnalysisResult, ServiceError> {
        let input = match feedback {
            Some(reason) => format!("Query: {} (Fix: {})", raw_query, reason),
            None => format!("Query: {}", raw_query),
        };

        let response = self
            .llm
            .complete(ANALYSIS_INSTRUCTION, &input, &CompletionOptions::structured())
            .await?;

        let analysis = parse_analysis(&response, raw_query)?;
        tracing::debug!(
            category = %analysis.category,
            tone = %analysis.tone,
            "Query analyzed"
        );
        Ok(analysis)
    }
}

fn required(field: Option<String>, name: &str) -> Result<String, ServiceError> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::Malformed(format!("analysis missing '{}'", name)))
}

fn parse_analysis(response: &str, raw_query: &str) -> Result<AnalysisResult, ServiceError> {
    let raw: RawAnalysis = serde_json::from_str(extract_json_object(response))
        .map_err(|e| ServiceError::Malformed(format!("analysis is not valid JSON: {}", e)))?;

    let intent = required(raw.intent, "intent")?;
    let category = required(raw.category, "category")?;
    let tone_label = required(raw.answer_tone, "answer_tone")?;
    let tone = Tone::parse(&tone_label)
        .ok_or_else(|| ServiceError::Malformed(format!("unknown answer_tone '{}'", tone_label)))?;

    let rewritten_query = match raw.rewritten_query {
        Some(rewrite) if !rewrite.trim().is_empty() => rewrite.trim().to_string(),
        Some(_) => raw_query.to_string(),
        None => {
            return Err(ServiceError::Malformed(
                "analysis missing 'rewritten_query'".to_string(),
            ))
        }
    };

    Ok(AnalysisResult {
        intent,
        category,
        tone,
        rewritten_query,
        rationale: raw.rewrite_rationale.unwrap_or_default(),
    })
}

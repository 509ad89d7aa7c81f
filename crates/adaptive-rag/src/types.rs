use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rag::FallbackReason;
use crate::trace::PipelineTrace;

pub const DEFAULT_CATEGORY: &str = "General";

/// Answer register requested by the analyzer and honoured by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Tone {
    #[default]
    #[serde(rename = "Simplified Educational")]
    SimplifiedEducational,
    #[serde(rename = "Structured Clinical")]
    StructuredClinical,
}

impl Tone {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SimplifiedEducational => "Simplified Educational",
            Self::StructuredClinical => "Structured Clinical",
        }
    }

    /// Lenient label match; models often vary casing or drop a word.
    pub fn parse(label: &str) -> Option<Self> {
        let lower = label.trim().to_lowercase();
        if lower.contains("clinical") || lower.contains("structured") {
            Some(Self::StructuredClinical)
        } else if lower.contains("educational") || lower.contains("simplified") {
            Some(Self::SimplifiedEducational)
        } else {
            None
        }
    }

    /// Fixed style instructions for each tone. The judges see the same text,
    /// so a given label always produces the same structure.
    pub fn style_template(&self) -> &'static str {
        match self {
            Self::SimplifiedEducational => {
                "Write for a learner. Open with a one-sentence plain-language summary, \
                 explain in short paragraphs without jargon, and finish with a line \
                 starting with 'Key takeaway:'."
            }
            Self::StructuredClinical => {
                "Write for a clinician. Use the headings 'Summary', 'Guideline evidence' \
                 and 'Considerations', with concise bullet points under each heading."
            }
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured reading of a raw query, produced once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub intent: String,
    pub category: String,
    pub tone: Tone,
    pub rewritten_query: String,
    #[serde(default)]
    pub rationale: String,
}

/// Uniform result shape for every validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    pub score: f32,
    pub reason: String,
}

impl GateVerdict {
    pub fn pass(score: f32, reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            score,
            reason: reason.into(),
        }
    }

    pub fn fail(score: f32, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            score,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub source_id: String,
    /// Document the chunk was cut from.
    pub source: String,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub text: String,
    pub tone_applied: Tone,
    pub source_chunk_ids: Vec<String>,
    pub is_fallback: bool,
}

impl GeneratedAnswer {
    pub fn grounded(text: String, tone: Tone, chunks: &[RetrievedChunk]) -> Self {
        Self {
            text,
            tone_applied: tone,
            source_chunk_ids: chunks.iter().map(|c| c.source_id.clone()).collect(),
            is_fallback: false,
        }
    }

    /// Fallback answers never point at knowledge-base chunks.
    pub fn fallback(text: String, tone: Tone) -> Self {
        Self {
            text,
            tone_applied: tone,
            source_chunk_ids: Vec::new(),
            is_fallback: true,
        }
    }
}

/// How the central control node picked the retrieval query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum QueryStrategy {
    /// Rewrite matched the original modulo case and whitespace.
    Identical,
    RewriteAccepted,
    /// Safety validation failed; the raw query is used instead.
    OriginalKept { reason: String },
}

/// Per-request working state. The raw query is fixed at construction.
#[derive(Debug, Clone)]
pub struct QueryContext {
    raw_query: String,
    pub intent: Option<String>,
    pub category: Option<String>,
    pub tone: Option<Tone>,
    pub rewritten_query: Option<String>,
    strategy: Option<QueryStrategy>,
    pub cycle_count: u32,
}

impl QueryContext {
    pub fn new(raw_query: impl Into<String>) -> Self {
        Self {
            raw_query: raw_query.into(),
            intent: None,
            category: None,
            tone: None,
            rewritten_query: None,
            strategy: None,
            cycle_count: 0,
        }
    }

    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    pub fn apply_analysis(&mut self, analysis: &AnalysisResult) {
        self.intent = Some(analysis.intent.clone());
        self.category = Some(analysis.category.clone());
        self.tone = Some(analysis.tone);
        self.rewritten_query = Some(analysis.rewritten_query.clone());
        self.strategy = None;
    }

    pub fn set_strategy(&mut self, strategy: QueryStrategy) {
        self.strategy = Some(strategy);
    }

    pub fn strategy(&self) -> Option<&QueryStrategy> {
        self.strategy.as_ref()
    }

    /// The string sent to retrieval: the rewrite only when it was accepted,
    /// otherwise the raw query. There is no third option.
    pub fn effective_query(&self) -> &str {
        match (&self.strategy, &self.rewritten_query) {
            (Some(QueryStrategy::RewriteAccepted), Some(rewritten)) => rewritten,
            _ => &self.raw_query,
        }
    }

    pub fn category_or_default(&self) -> &str {
        self.category.as_deref().unwrap_or(DEFAULT_CATEGORY)
    }

    pub fn tone_or_default(&self) -> Tone {
        self.tone.unwrap_or_default()
    }
}

/// What `Orchestrator::process` hands back to the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub answer: String,
    pub category: String,
    pub tone: Tone,
    pub is_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub success: bool,
    pub effective_query: Option<String>,
    pub source_chunk_ids: Vec<String>,
    pub cycles_used: u32,
    pub trace: PipelineTrace,
    pub logs: Vec<String>,
}

//! Append-only execution trace returned alongside every pipeline result.
//!
//! The trace is diagnostic output for the caller. The orchestrator writes to
//! it but never reads it back to make a decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AnalysisResult, GateVerdict, QueryStrategy, Tone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    RelevanceGate,
    QueryAnalysis,
    SafetyValidation,
    CentralControl,
    Retrieval,
    CoverageGuard,
    RetrievalGrading,
    AnswerGeneration,
    HallucinationCheck,
    FinalCheck,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RelevanceGate => "Relevance Gate",
            Self::QueryAnalysis => "Query Analysis",
            Self::SafetyValidation => "Safety Validation",
            Self::CentralControl => "Central Control",
            Self::Retrieval => "Document Retrieval",
            Self::CoverageGuard => "KB Coverage Guard",
            Self::RetrievalGrading => "Retrieval Grading",
            Self::AnswerGeneration => "Answer Generation",
            Self::HallucinationCheck => "Hallucination Check",
            Self::FinalCheck => "Final Relevance Check",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    Verdict(GateVerdict),
    Analysis(AnalysisResult),
    Strategy {
        #[serde(flatten)]
        strategy: QueryStrategy,
        effective_query: String,
    },
    Retrieval {
        k: usize,
        sources: Vec<String>,
        top_score: Option<f32>,
    },
    Answer {
        tone: Tone,
        length: usize,
        source_count: usize,
    },
    Error {
        kind: String,
        message: String,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub cycle: u32,
    pub step: Step,
    pub status: StepStatus,
    pub output: StepOutput,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineTrace {
    entries: Vec<TraceEntry>,
}

impl PipelineTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, cycle: u32, step: Step, status: StepStatus, output: StepOutput) {
        tracing::debug!(cycle, step = step.name(), status = ?status, "Trace entry");
        self.entries.push(TraceEntry {
            cycle,
            step,
            status,
            output,
            at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest cycle number that appears in the trace.
    pub fn max_cycle(&self) -> Option<u32> {
        self.entries.iter().map(|e| e.cycle).max()
    }

    pub fn count_step(&self, step: Step) -> usize {
        self.entries.iter().filter(|e| e.step == step).count()
    }

    /// Entries of one cycle, in execution order.
    pub fn cycle(&self, cycle: u32) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(move |e| e.cycle == cycle)
    }
}

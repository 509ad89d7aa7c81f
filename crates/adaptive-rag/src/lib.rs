pub mod config;
pub mod embeddings;
pub mod error;
pub mod knowledge_base;
pub mod llm;
pub mod orchestrator;
pub mod rag;
pub mod storage;
pub mod trace;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export primary types for convenience
pub use config::{CoveragePolicy, PipelineConfig, RagConfig};
pub use error::ServiceError;
pub use knowledge_base::{DomainReference, KnowledgeBase};
pub use llm::{CompletionOptions, CompletionService, OpenAiCompatibleClient};
pub use orchestrator::Orchestrator;
pub use rag::{FallbackReason, StageOutcome, Validator, FALLBACK_DISCLAIMER};
pub use trace::{PipelineTrace, Step, StepOutput, StepStatus, TraceEntry};
pub use types::{
    AnalysisResult, GateVerdict, GeneratedAnswer, PipelineResult, QueryContext, QueryStrategy,
    RetrievedChunk, Tone,
};

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;

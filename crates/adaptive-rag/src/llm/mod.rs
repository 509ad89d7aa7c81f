//! Completion service seam used by every LLM-backed stage.

pub mod openai;

use async_trait::async_trait;

use crate::error::ServiceError;

pub use openai::OpenAiCompatibleClient;

/// Per-call overrides; `None` falls back to the client's configured value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl CompletionOptions {
    /// Deterministic short output, used by the yes/no judges.
    pub fn verdict() -> Self {
        Self {
            temperature: Some(0.0),
            max_tokens: Some(16),
        }
    }

    /// Deterministic JSON output, used by the analyzer and safety check.
    pub fn structured() -> Self {
        Self {
            temperature: Some(0.0),
            max_tokens: Some(512),
        }
    }
}

/// A chat-completion backend: instruction goes in the system slot, input in
/// the user slot, and the raw text of the first choice comes back.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        instruction: &str,
        input: &str,
        options: &CompletionOptions,
    ) -> Result<String, ServiceError>;

    /// Human-readable backend name for logs.
    fn name(&self) -> String {
        "completion-service".to_string()
    }
}

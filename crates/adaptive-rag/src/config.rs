use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DOMAIN_TEXT: &str = "Rational antibiotic use, antimicrobial resistance, stewardship, \
     microbiology, guideline-based reasoning";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub domain: DomainConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Extra attempts after an HTTP 429 before giving up with `RateLimited`.
    pub rate_limit_retries: u32,
    /// Base delay for the linear 429 backoff (attempt n waits n * base).
    pub backoff_base_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_dir: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// JSON snapshot searched exhaustively in memory.
    Flat,
    /// Read-only LanceDB table produced by the ingestion job.
    Lance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub path: PathBuf,
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Text whose embedding stands in for the whole knowledge domain.
    pub domain_text: String,
}

/// What the pipeline does after the coverage guard rejects a retrieval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CoveragePolicy {
    /// Spend a retry and restart the whole cycle from query analysis.
    RestartCycle,
    /// Spend a retry and re-run retrieval only, widening K by `step` each time.
    ExpandRetrieval { step: usize },
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self::RestartCycle
    }
}

/// Per-request knobs recognised by `Orchestrator::process`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub relevance_threshold: f32,
    pub coverage_threshold: f32,
    pub top_k: usize,
    /// Total number of cycles a request may run before falling back.
    pub max_retries: u32,
    pub coverage_policy: CoveragePolicy,
    pub call_timeout_secs: u64,
    /// Chunk text is truncated to this many characters before coverage scoring.
    pub coverage_chars: usize,
}

impl PipelineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    /// Cycle budget, never below one attempt.
    pub fn cycle_budget(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err("pipeline.relevance_threshold must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.coverage_threshold) {
            return Err("pipeline.coverage_threshold must be in [0.0, 1.0]".into());
        }
        if self.top_k == 0 {
            return Err("pipeline.top_k must be > 0".into());
        }
        if self.max_retries == 0 {
            return Err("pipeline.max_retries must be > 0".into());
        }
        if let CoveragePolicy::ExpandRetrieval { step } = self.coverage_policy {
            if step == 0 {
                return Err("pipeline.coverage_policy.step must be > 0".into());
            }
        }
        if self.call_timeout_secs == 0 {
            return Err("pipeline.call_timeout_secs must be > 0".into());
        }
        if self.coverage_chars == 0 {
            return Err("pipeline.coverage_chars must be > 0".into());
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.1,
            coverage_threshold: 0.45,
            top_k: 3,
            max_retries: 2,
            coverage_policy: CoveragePolicy::RestartCycle,
            call_timeout_secs: 60,
            coverage_chars: 1000,
        }
    }
}

impl RagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.llm.base_url.trim().is_empty() {
            return Err("llm.base_url must not be empty".into());
        }
        if self.llm.model.trim().is_empty() {
            return Err("llm.model must not be empty".into());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err("llm.temperature must be in [0.0, 2.0]".into());
        }
        if self.llm.request_timeout_secs == 0 {
            return Err("llm.request_timeout_secs must be > 0".into());
        }
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.embedding.max_length < 8 {
            return Err("embedding.max_length must be >= 8".into());
        }
        if self.index.backend == IndexBackend::Lance && self.index.table_name.trim().is_empty() {
            return Err("index.table_name must not be empty for the lance backend".into());
        }
        if self.domain.domain_text.trim().is_empty() {
            return Err("domain.domain_text must not be empty".into());
        }
        self.pipeline.validate()
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `RAG_*` environment variables on top of the loaded values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("RAG_LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(url) = lookup("RAG_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("RAG_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(path) = lookup("RAG_INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("RAG_MODEL_DIR") {
            self.embedding.model_dir = PathBuf::from(dir);
        }
        if let Some(text) = lookup("RAG_DOMAIN_TEXT") {
            self.domain.domain_text = text;
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: String::new(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.1,
            max_tokens: 1024,
            rate_limit_retries: 2,
            backoff_base_ms: 2000,
            request_timeout_secs: 30,
        }
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            domain_text: DEFAULT_DOMAIN_TEXT.to_string(),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("adaptive-rag");

        let model_root = if Path::new("models").exists() {
            PathBuf::from("models")
        } else if let Ok(env_path) = std::env::var("MODEL_PATH") {
            PathBuf::from(env_path)
        } else {
            data_dir.join("models")
        };

        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig {
                model_dir: model_root.join("all-MiniLM-L6-v2"),
                dimension: 384,
                max_length: 256,
                cache_size: 1000,
            },
            index: IndexConfig {
                backend: IndexBackend::Flat,
                path: data_dir.join("vector_store").join("index.json"),
                table_name: "documents".to_string(),
            },
            domain: DomainConfig::default(),
            pipeline: PipelineConfig::default(),
            data_dir,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        RagConfig::default().embedding
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        RagConfig::default().index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.relevance_threshold, 0.1);
        assert_eq!(config.coverage_threshold, 0.45);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.coverage_policy, CoveragePolicy::RestartCycle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_broken_values() {
        let mut config = PipelineConfig::default();
        config.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.coverage_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.coverage_policy = CoveragePolicy::ExpandRetrieval { step: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cycle_budget_never_zero() {
        let mut config = PipelineConfig::default();
        config.max_retries = 0;
        assert_eq!(config.cycle_budget(), 1);
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"pipeline": {{"top_k": 5, "coverage_policy": {{"mode": "expand_retrieval", "step": 2}}}}}}"#
        )
        .unwrap();

        let config = RagConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.top_k, 5);
        assert_eq!(
            config.pipeline.coverage_policy,
            CoveragePolicy::ExpandRetrieval { step: 2 }
        );
        assert_eq!(config.pipeline.coverage_threshold, 0.45);
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pipeline": {{"relevance_threshold": -0.5}}}}"#).unwrap();
        assert!(RagConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RAG_LLM_API_KEY", "secret"),
            ("RAG_LLM_MODEL", "mixtral"),
            ("RAG_DOMAIN_TEXT", "cardiology"),
        ]
        .into_iter()
        .collect();

        let mut config = RagConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key, "secret");
        assert_eq!(config.llm.model, "mixtral");
        assert_eq!(config.domain.domain_text, "cardiology");
        assert_eq!(config.llm.base_url, LlmConfig::default().base_url);
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = RagConfig::default();
        config.llm.api_key = "secret".into();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}

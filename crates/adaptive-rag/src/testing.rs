//! Deterministic collaborators for unit and integration tests. Enabled for
//! downstream tests with the `test-utils` feature.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::embeddings::EmbeddingModel;
use crate::error::ServiceError;
use crate::knowledge_base::KnowledgeBase;
use crate::llm::{CompletionOptions, CompletionService};
use crate::rag::fallback::FALLBACK_INSTRUCTION;
use crate::rag::final_check::FINAL_INSTRUCTION;
use crate::rag::hallucination::HALLUCINATION_INSTRUCTION;
use crate::rag::query_analyzer::ANALYSIS_INSTRUCTION;
use crate::rag::retrieval_grader::GRADER_INSTRUCTION;
use crate::rag::safety::SAFETY_INSTRUCTION;
use crate::storage::{FlatIndex, IndexEntry, IndexHit, VectorIndex};

pub const DOMAIN_TEXT: &str = "Rational antibiotic use, antimicrobial resistance, stewardship, \
     microbiology, guideline-based reasoning";

/// Bag-of-keywords embedder: one dimension per vocabulary word, set when the
/// lowercased text contains it.
pub struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
}

impl KeywordEmbedder {
    pub fn medical() -> Self {
        Self {
            vocabulary: vec![
                "antibiotic",
                "antimicrobial",
                "resistance",
                "stewardship",
                "microbiology",
                "guideline",
                "penicillin",
                "bacteria",
                "amoxicillin",
                "dose",
                "mrsa",
                "sepsis",
                "sourdough",
                "bake",
                "bread",
                "cake",
            ],
        }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        self.vocabulary
            .iter()
            .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
            .collect()
    }
}

impl EmbeddingModel for KeywordEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len()
    }
}

pub struct FailingEmbedder;

impl EmbeddingModel for FailingEmbedder {
    fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(anyhow!("model not loaded"))
    }

    fn embed_document(&self, _text: &str) -> Result<Vec<f32>> {
        Err(anyhow!("model not loaded"))
    }

    fn dimension(&self) -> usize {
        0
    }
}

pub fn flat_index(embedder: &dyn EmbeddingModel, chunks: &[(&str, &str)]) -> FlatIndex {
    let entries = chunks
        .iter()
        .map(|(id, text)| IndexEntry {
            id: id.to_string(),
            source: format!("{}.pdf", id),
            text: text.to_string(),
            vector: embedder
                .embed_document(text)
                .expect("test embedder never fails"),
        })
        .collect();
    FlatIndex::from_entries(embedder.dimension(), entries).expect("test vectors share one dimension")
}

pub fn test_kb(chunks: &[(&str, &str)]) -> Arc<KnowledgeBase> {
    let index = flat_index(&KeywordEmbedder::medical(), chunks);
    knowledge_base(Arc::new(index))
}

/// Knowledge base over any index, embedded with [`KeywordEmbedder::medical`].
pub fn knowledge_base(index: Arc<dyn VectorIndex>) -> Arc<KnowledgeBase> {
    let embedder = Arc::new(KeywordEmbedder::medical());
    Arc::new(KnowledgeBase::new(index, embedder, DOMAIN_TEXT).expect("domain text is not blank"))
}

/// Wraps an index and records every search `k`.
pub struct CountingIndex {
    inner: Box<dyn VectorIndex>,
    pub searches: Mutex<Vec<usize>>,
}

impl CountingIndex {
    pub fn new(inner: Box<dyn VectorIndex>) -> Self {
        Self {
            inner,
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn search_count(&self) -> usize {
        self.searches.lock().len()
    }
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, ServiceError> {
        self.searches.lock().push(k);
        self.inner.search(query, k).await
    }

    async fn len(&self) -> Result<usize, ServiceError> {
        self.inner.len().await
    }
}

pub struct UnavailableIndex;

#[async_trait]
impl VectorIndex for UnavailableIndex {
    async fn search(&self, _query: &[f32], _k: usize) -> Result<Vec<IndexHit>, ServiceError> {
        Err(ServiceError::IndexUnavailable("not loaded".into()))
    }

    async fn len(&self) -> Result<usize, ServiceError> {
        Err(ServiceError::IndexUnavailable("not loaded".into()))
    }
}

/// Times out on the first `failures` searches, then delegates.
pub struct FlakyIndex {
    inner: Box<dyn VectorIndex>,
    failures: Mutex<usize>,
}

impl FlakyIndex {
    pub fn new(inner: Box<dyn VectorIndex>, failures: usize) -> Self {
        Self {
            inner,
            failures: Mutex::new(failures),
        }
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, ServiceError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ServiceError::Timeout {
                    operation: "search".into(),
                    seconds: 30,
                });
            }
        }
        self.inner.search(query, k).await
    }

    async fn len(&self) -> Result<usize, ServiceError> {
        self.inner.len().await
    }
}

fn stage_of(instruction: &str) -> &'static str {
    if instruction == ANALYSIS_INSTRUCTION {
        "analyze"
    } else if instruction == SAFETY_INSTRUCTION {
        "safety"
    } else if instruction == GRADER_INSTRUCTION {
        "grade"
    } else if instruction == HALLUCINATION_INSTRUCTION {
        "hallucination"
    } else if instruction == FINAL_INSTRUCTION {
        "final"
    } else if instruction == FALLBACK_INSTRUCTION {
        "fallback"
    } else {
        "generate"
    }
}

/// Completion stub with per-stage reply queues. When a queue is empty the
/// stage default is used; with no default the call fails as malformed.
#[derive(Default)]
pub struct ScriptedLlm {
    queues: Mutex<HashMap<&'static str, VecDeque<Result<String, ServiceError>>>>,
    defaults: Mutex<HashMap<&'static str, String>>,
    log: Mutex<Vec<(&'static str, String)>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies that make every stage pass with the given rewrite.
    pub fn happy_path(rewrite: &str) -> Self {
        let llm = Self::new();
        llm.set_default("analyze", &analysis_json(rewrite));
        llm.set_default("safety", r#"{"risk_level": "low"}"#);
        llm.set_default("grade", "GOOD");
        llm.set_default("generate", "Resistance arises when bacteria adapt.");
        llm.set_default("hallucination", "NO");
        llm.set_default("final", "YES");
        llm.set_default("fallback", "General educational information.");
        llm
    }

    pub fn push(&self, stage: &'static str, reply: Result<String, ServiceError>) {
        self.queues.lock().entry(stage).or_default().push_back(reply);
    }

    pub fn set_default(&self, stage: &'static str, reply: &str) {
        self.defaults.lock().insert(stage, reply.to_string());
    }

    pub fn calls(&self, stage: &str) -> usize {
        self.log.lock().iter().filter(|(s, _)| *s == stage).count()
    }

    pub fn inputs(&self, stage: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, input)| input.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().len()
    }
}

pub fn analysis_json(rewrite: &str) -> String {
    serde_json::json!({
        "intent": "understand antibiotic resistance",
        "category": "Resistance Mechanism",
        "answer_tone": "Structured Clinical",
        "rewritten_query": rewrite,
        "rewrite_rationale": "clarified terminology"
    })
    .to_string()
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn complete(
        &self,
        instruction: &str,
        input: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ServiceError> {
        let stage = stage_of(instruction);
        self.log.lock().push((stage, input.to_string()));

        if let Some(reply) = self.queues.lock().get_mut(stage).and_then(|q| q.pop_front()) {
            return reply;
        }
        self.defaults
            .lock()
            .get(stage)
            .cloned()
            .ok_or_else(|| ServiceError::Malformed(format!("no scripted reply for {}", stage)))
    }
}

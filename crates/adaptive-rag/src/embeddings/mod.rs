pub mod onnx;

use anyhow::Result;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub use onnx::{OnnxEmbedderConfig, OnnxSentenceEmbedder};

/// Unified embedding model trait
pub trait EmbeddingModel: Send + Sync {
    /// Embed a search query (with appropriate prefix for the model)
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a document/passage (with appropriate prefix for the model)
    fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embed documents
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_document(t)).collect()
    }

    /// Embedding vector dimension
    fn dimension(&self) -> usize;
}

/// Cosine similarity clamped to [-1, 1]. Zero or mismatched vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum CacheMode {
    Query,
    Document,
}

/// LRU-caching wrapper around any embedding model.
///
/// Queries repeat across retries and the coverage guard re-embeds the same
/// chunks, so caching by exact text saves most model invocations.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingModel>,
    cache: Mutex<lru::LruCache<(CacheMode, String), Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingModel>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    fn cached<F>(&self, mode: CacheMode, text: &str, compute: F) -> Result<Vec<f32>>
    where
        F: FnOnce(&str) -> Result<Vec<f32>>,
    {
        let key = (mode, text.to_string());
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(hit.clone());
        }

        // Lock is released while the model runs.
        let vector = compute(text)?;
        self.cache.lock().put(key, vector.clone());
        Ok(vector)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl EmbeddingModel for CachedEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.cached(CacheMode::Query, text, |t| self.inner.embed_query(t))
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.cached(CacheMode::Document, text, |t| self.inner.embed_document(t))
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

use std::sync::Arc;

use crate::embeddings::{cosine_similarity, EmbeddingModel};
use crate::error::ServiceError;

/// Embeds text off the async runtime and scores it by cosine similarity.
#[derive(Clone)]
pub struct SimilarityScorer {
    embedder: Arc<dyn EmbeddingModel>,
}

impl SimilarityScorer {
    pub fn new(embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self { embedder }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let embedder = self.embedder.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || embedder.embed_query(&text))
            .await
            .map_err(|e| ServiceError::Embedding(format!("embedding task failed: {}", e)))?
            .map_err(|e| ServiceError::Embedding(e.to_string()))
    }

    pub async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ServiceError> {
        let embedder = self.embedder.clone();
        tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            embedder.embed_documents(&refs)
        })
        .await
        .map_err(|e| ServiceError::Embedding(format!("embedding task failed: {}", e)))?
        .map_err(|e| ServiceError::Embedding(e.to_string()))
    }

    /// Similarity of `text` to a precomputed reference vector.
    pub async fn score_against(&self, text: &str, reference: &[f32]) -> Result<f32, ServiceError> {
        let vector = self.embed_query(text).await?;
        Ok(cosine_similarity(&vector, reference))
    }

    /// Highest similarity between `query` and any of `texts`; `None` when
    /// `texts` is empty.
    pub async fn max_score(&self, query: &str, texts: Vec<String>) -> Result<Option<f32>, ServiceError> {
        if texts.is_empty() {
            return Ok(None);
        }
        let query_vector = self.embed_query(query).await?;
        let vectors = self.embed_documents(texts).await?;
        Ok(vectors
            .iter()
            .map(|v| cosine_similarity(&query_vector, v))
            .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s)))))
    }
}

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::knowledge_base::KnowledgeBase;
use crate::types::RetrievedChunk;

pub struct Retriever {
    kb: Arc<KnowledgeBase>,
}

impl Retriever {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }

    /// Top-`k` chunks for `query`, best first. An empty index is an
    /// operational failure, not an empty result.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, ServiceError> {
        if self.kb.index().is_empty().await? {
            return Err(ServiceError::EmptyIndex);
        }

        let vector = self.kb.scorer().embed_query(query).await?;
        let hits = self.kb.index().search(&vector, k).await?;

        let mut chunks: Vec<RetrievedChunk> = hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                text: hit.text,
                source_id: hit.id,
                source: hit.source,
                similarity_score: hit.score,
            })
            .collect();

        // Stable sort keeps the backend's tie order.
        chunks.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(Ordering::Equal)
        });
        chunks.truncate(k);

        tracing::debug!(
            k,
            returned = chunks.len(),
            top_score = chunks.first().map(|c| c.similarity_score),
            "Retrieved chunks"
        );
        Ok(chunks)
    }
}

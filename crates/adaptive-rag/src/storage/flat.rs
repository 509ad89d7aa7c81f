use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

use super::{IndexHit, VectorIndex};
use crate::embeddings::cosine_similarity;
use crate::error::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    #[serde(default)]
    pub source: String,
    pub text: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

/// Exhaustive in-memory cosine index loaded from a JSON snapshot.
pub struct FlatIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl FlatIndex {
    pub fn from_entries(dimension: usize, entries: Vec<IndexEntry>) -> Result<Self> {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimension) {
            return Err(anyhow!(
                "entry '{}' has dimension {} (expected {})",
                bad.id,
                bad.vector.len(),
                dimension
            ));
        }
        Ok(Self { dimension, entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read index snapshot {}", path.display()))?;
        let snapshot: Snapshot =
            serde_json::from_str(&content).context("Failed to parse index snapshot")?;

        tracing::info!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            dimension = snapshot.dimension,
            "Loaded flat index snapshot"
        );
        Self::from_entries(snapshot.dimension, snapshot.entries)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = Snapshot {
            dimension: self.dimension,
            entries: self.entries.clone(),
        };
        std::fs::write(path, serde_json::to_string(&snapshot)?)?;
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, ServiceError> {
        if query.len() != self.dimension {
            return Err(ServiceError::IndexUnavailable(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<IndexHit> = self
            .entries
            .iter()
            .map(|entry| IndexHit {
                id: entry.id.clone(),
                source: entry.source.clone(),
                text: entry.text.clone(),
                score: cosine_similarity(query, &entry.vector).max(0.0),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn len(&self) -> Result<usize, ServiceError> {
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.into(),
            source: format!("{}.pdf", id),
            text: format!("text of {}", id),
            vector,
        }
    }

    fn index() -> FlatIndex {
        FlatIndex::from_entries(
            2,
            vec![
                entry("c", vec![0.0, 1.0]),
                entry("a", vec![1.0, 0.0]),
                entry("b", vec![1.0, 0.0]),
                entry("d", vec![-1.0, 0.0]),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_search_orders_by_score_then_id() {
        let hits = index().search(&[1.0, 0.0], 3).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[2].score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_scores_never_negative() {
        let hits = index().search(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| h.score >= 0.0));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_unavailable() {
        let err = index().search(&[1.0, 0.0, 0.0], 3).await.unwrap_err();
        assert_eq!(err.kind(), "index_unavailable");
    }

    #[test]
    fn test_rejects_inconsistent_entries() {
        assert!(FlatIndex::from_entries(3, vec![entry("a", vec![1.0])]).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_store").join("index.json");
        index().save(&path).unwrap();

        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded.dimension(), 2);
        assert_eq!(loaded.len().await.unwrap(), 4);
        assert!(!loaded.is_empty().await.unwrap());
    }
}

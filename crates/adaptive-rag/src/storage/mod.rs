//! Read-only vector index backends.

pub mod flat;
pub mod lance_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub use flat::{FlatIndex, IndexEntry};
pub use lance_store::LanceIndex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    pub source: String,
    pub text: String,
    /// Cosine similarity in [0, 1]; higher is closer.
    pub score: f32,
}

/// Nearest-neighbour lookup over pre-embedded chunks. The pipeline never
/// writes to an index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, ServiceError>;

    async fn len(&self) -> Result<usize, ServiceError>;

    async fn is_empty(&self) -> Result<bool, ServiceError> {
        Ok(self.len().await? == 0)
    }
}

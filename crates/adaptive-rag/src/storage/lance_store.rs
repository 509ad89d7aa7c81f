use anyhow::{Context, Result};
use arrow_array::{Array, Float32Array, RecordBatch, StringArray};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::{IndexHit, VectorIndex};
use crate::error::ServiceError;

/// Read-only view over a LanceDB table with `id`, `text`, `source` and
/// `vector` columns, as written by the ingestion job.
pub struct LanceIndex {
    table: lancedb::Table,
    table_name: String,
}

impl LanceIndex {
    pub async fn open(path: &str, table_name: &str) -> Result<Self> {
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let table = db
            .open_table(table_name)
            .execute()
            .await
            .with_context(|| format!("Failed to open LanceDB table '{}'", table_name))?;

        tracing::info!(path, table = table_name, "Opened LanceDB index");
        Ok(Self {
            table,
            table_name: table_name.to_string(),
        })
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, ServiceError> {
        let unavailable =
            |e: lancedb::Error| ServiceError::IndexUnavailable(format!("{}: {}", self.table_name, e));

        let results = self
            .table
            .query()
            .nearest_to(query)
            .map_err(unavailable)?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(unavailable)?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(unavailable)?;

        let mut hits = extract_hits_from_batches(&batches);
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn len(&self) -> Result<usize, ServiceError> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| ServiceError::IndexUnavailable(format!("{}: {}", self.table_name, e)))
    }
}

fn extract_hits_from_batches(batches: &[RecordBatch]) -> Vec<IndexHit> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let texts = batch.column_by_name("text").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let sources = batch.column_by_name("source").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(texts)) = (ids, texts) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            // Cosine distance is 1 - similarity.
            let score = distances.map(|d| (1.0 - d.value(i)).max(0.0)).unwrap_or(0.0);
            let id = ids.value(i).to_string();
            hits.push(IndexHit {
                source: sources.map(|s| s.value(i).to_string()).unwrap_or_else(|| id.clone()),
                id,
                text: texts.value(i).to_string(),
                score,
            });
        }
    }
    hits
}

//! Process-wide, read-only retrieval state shared by every request.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

use crate::config::{IndexBackend, RagConfig};
use crate::embeddings::{CachedEmbedder, EmbeddingModel, OnnxEmbedderConfig, OnnxSentenceEmbedder};
use crate::rag::scorer::SimilarityScorer;
use crate::storage::{FlatIndex, LanceIndex, VectorIndex};

/// Embedded representation of the in-scope subject area.
#[derive(Debug, Clone)]
pub struct DomainReference {
    pub text: String,
    pub vector: Vec<f32>,
}

/// Index, scorer and domain reference, built once at startup and handed to
/// requests as `Arc<KnowledgeBase>`. Nothing here is mutated afterwards.
pub struct KnowledgeBase {
    index: Arc<dyn VectorIndex>,
    scorer: SimilarityScorer,
    domain: DomainReference,
}

impl KnowledgeBase {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingModel>,
        domain_text: &str,
    ) -> Result<Self> {
        if domain_text.trim().is_empty() {
            return Err(anyhow!("domain reference text must not be empty"));
        }
        let vector = embedder
            .embed_query(domain_text)
            .context("Failed to embed domain reference")?;

        Ok(Self {
            index,
            scorer: SimilarityScorer::new(embedder),
            domain: DomainReference {
                text: domain_text.to_string(),
                vector,
            },
        })
    }

    /// Load the embedding model and open the configured index.
    pub async fn open(config: &RagConfig) -> Result<Self> {
        let model_config = OnnxEmbedderConfig::from_model_dir(
            &config.embedding.model_dir,
            config.embedding.dimension,
            config.embedding.max_length,
        )
        .ok_or_else(|| {
            anyhow!(
                "No ONNX model and tokenizer.json found in {}",
                config.embedding.model_dir.display()
            )
        })?;

        let model: Arc<dyn EmbeddingModel> = Arc::new(OnnxSentenceEmbedder::new(model_config)?);
        let embedder: Arc<dyn EmbeddingModel> =
            Arc::new(CachedEmbedder::new(model, config.embedding.cache_size));

        let index: Arc<dyn VectorIndex> = match config.index.backend {
            IndexBackend::Flat => {
                let flat = FlatIndex::load(&config.index.path)?;
                if flat.dimension() != embedder.dimension() {
                    return Err(anyhow!(
                        "Index dimension {} does not match embedding dimension {}",
                        flat.dimension(),
                        embedder.dimension()
                    ));
                }
                Arc::new(flat)
            }
            IndexBackend::Lance => {
                let path = config.index.path.to_string_lossy().to_string();
                Arc::new(LanceIndex::open(&path, &config.index.table_name).await?)
            }
        };

        tracing::info!(
            backend = ?config.index.backend,
            path = %config.index.path.display(),
            "Knowledge base ready"
        );
        Self::new(index, embedder, &config.domain.domain_text)
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    pub fn domain(&self) -> &DomainReference {
        &self.domain
    }
}

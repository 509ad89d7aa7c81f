use anyhow::{anyhow, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use super::EmbeddingModel;

#[derive(Debug, Clone)]
pub struct OnnxEmbedderConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub normalize: bool,
}

impl OnnxEmbedderConfig {
    /// Locate `model.onnx` (or a quantized variant) and `tokenizer.json` in a
    /// sentence-transformers export directory.
    pub fn from_model_dir(model_dir: &Path, dimension: usize, max_length: usize) -> Option<Self> {
        let model_file = ["model_quantized.onnx", "model_O4.onnx", "model.onnx"]
            .iter()
            .map(|name| model_dir.join(name))
            .chain(std::iter::once(model_dir.join("onnx").join("model.onnx")))
            .find(|p| p.exists())?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return None;
        }

        Some(Self {
            model_path: model_file,
            tokenizer_path,
            dimension,
            max_length,
            normalize: true,
        })
    }
}

/// Mean-pooled sentence embeddings from a BERT-style ONNX export
/// (all-MiniLM-L6-v2 by default).
pub struct OnnxSentenceEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    needs_token_type_ids: bool,
    config: OnnxEmbedderConfig,
}

impl OnnxSentenceEmbedder {
    pub fn new(config: OnnxEmbedderConfig) -> Result<Self> {
        ort::init().with_name("adaptive_rag_embeddings").commit();

        if !config.model_path.exists() {
            return Err(anyhow!(
                "Model file not found at: {}",
                config.model_path.display()
            ));
        }

        let model_bytes = std::fs::read(&config.model_path)
            .map_err(|e| anyhow!("Failed to read model: {:?}", e))?;

        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Optimization level: {:?}", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| anyhow!("Intra threads: {:?}", e))?
            .with_inter_threads(1)
            .map_err(|e| anyhow!("Inter threads: {:?}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load model: {:?}", e))?;

        let needs_token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer.json: {}", e))?;

        tracing::info!(
            model = %config.model_path.display(),
            dimension = config.dimension,
            needs_token_type_ids,
            "Loaded ONNX sentence embedder"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            needs_token_type_ids,
            config,
        })
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let len = encoding.get_ids().len().min(self.config.max_length).max(1);
        let ids: Vec<i64> = take_padded(encoding.get_ids(), len);
        let mask: Vec<i64> = take_padded(encoding.get_attention_mask(), len);
        let type_ids: Vec<i64> = take_padded(encoding.get_type_ids(), len);

        let shape = vec![1, len];
        let input_ids = Value::from_array((shape.clone(), ids))
            .map_err(|e| anyhow!("input_ids tensor: {:?}", e))?;
        let attention_mask = Value::from_array((shape.clone(), mask.clone()))
            .map_err(|e| anyhow!("attention_mask tensor: {:?}", e))?;

        let mut session = self.session.lock();
        let outputs = if self.needs_token_type_ids {
            let token_type_ids = Value::from_array((shape, type_ids))
                .map_err(|e| anyhow!("token_type_ids tensor: {:?}", e))?;
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])
        }
        .map_err(|e| anyhow!("Inference failed: {:?}", e))?;

        let output_name = outputs
            .iter()
            .find(|(name, _)| *name == "last_hidden_state" || *name == "token_embeddings")
            .map(|(name, _)| name.to_string())
            .or_else(|| outputs.iter().next().map(|(name, _)| name.to_string()))
            .ok_or_else(|| anyhow!("Model produced no outputs"))?;

        let (shape, data) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract output '{}': {:?}", output_name, e))?;

        if shape.len() != 3 {
            return Err(anyhow!(
                "Unexpected output rank {} for '{}'",
                shape.len(),
                output_name
            ));
        }

        let pooled = mean_pool(data, shape[1] as usize, shape[2] as usize, &mask);
        Ok(if self.config.normalize {
            l2_normalize(pooled)
        } else {
            pooled
        })
    }
}

fn take_padded(values: &[u32], len: usize) -> Vec<i64> {
    let mut out: Vec<i64> = values.iter().take(len).map(|&v| v as i64).collect();
    out.resize(len, 0);
    out
}

/// Attention-masked mean over the sequence axis of a `[1, seq, dim]` tensor.
fn mean_pool(data: &[f32], seq_len: usize, hidden_dim: usize, attention_mask: &[i64]) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut mask_sum = 0.0f32;

    for pos in 0..seq_len {
        let mask_val = attention_mask.get(pos).copied().unwrap_or(0) as f32;
        if mask_val > 0.0 {
            mask_sum += mask_val;
            let offset = pos * hidden_dim;
            for dim in 0..hidden_dim {
                pooled[dim] += data[offset + dim] * mask_val;
            }
        }
    }

    if mask_sum > 0.0 {
        for v in &mut pooled {
            *v /= mask_sum;
        }
    }
    pooled
}

fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

impl EmbeddingModel for OnnxSentenceEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

//! Local sentence-transformer backend using candle.

use super::Embedder;
use crate::error::{Result, ScorecardError};
use anyhow::Context;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::path::PathBuf;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tracing::info;

/// Multilingual default; reference texts mix Chinese and English.
pub const DEFAULT_MODEL: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";

/// Longer inputs are truncated; BERT position embeddings stop here.
const MAX_INPUT_TOKENS: usize = 512;

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    /// Download (or reuse the cached copy of) the three files a BERT model needs.
    fn fetch(model_id: &str) -> anyhow::Result<Self> {
        let repo = Api::new()
            .context("Failed to reach the Hugging Face Hub")?
            .repo(Repo::new(model_id.to_string(), RepoType::Model));
        let get = |name: &str| {
            repo.get(name)
                .with_context(|| format!("Failed to fetch {} for {}", name, model_id))
        };
        Ok(Self {
            config: get("config.json")?,
            tokenizer: get("tokenizer.json")?,
            weights: get("model.safetensors")?,
        })
    }
}

/// BERT-family sentence embedder with masked mean pooling.
pub struct LocalEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl LocalEmbedder {
    /// Load a sentence-transformers model by name from the Hugging Face Hub.
    pub fn load(model_id: &str) -> Result<Self> {
        let model_id = if model_id.trim().is_empty() {
            DEFAULT_MODEL
        } else {
            model_id
        };
        Self::from_hub(model_id).map_err(|e| ScorecardError::external("embedding", format!("{:#}", e)))
    }

    fn from_hub(model_id: &str) -> anyhow::Result<Self> {
        let files = ModelFiles::fetch(model_id)?;
        let device = Device::Cpu;

        let config: BertConfig = serde_json::from_str(
            &std::fs::read_to_string(&files.config).context("Failed to read model config")?,
        )
        .context("Failed to parse model config")?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer.with_padding(Some(PaddingParams::default()));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_INPUT_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;

        // SAFETY: the weights file is not modified while mapped.
        let weights = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights], DTYPE, &device)
                .context("Failed to map model weights")?
        };
        let model = BertModel::load(weights, &config).context("Failed to build BERT model")?;

        info!(model = model_id, dimension = config.hidden_size, "Loaded local embedding model");
        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: config.hidden_size,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// One row per input; the tokenizer pads the batch to its longest entry.
    fn encode(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let stack = |field: fn(&tokenizers::Encoding) -> &[u32]| -> anyhow::Result<Tensor> {
            let rows = encodings
                .iter()
                .map(|encoding| Tensor::new(field(encoding), &self.device))
                .collect::<candle_core::Result<Vec<_>>>()?;
            Ok(Tensor::stack(&rows, 0)?)
        };
        let input_ids = stack(|e| e.get_ids())?;
        let attention_mask = stack(|e| e.get_attention_mask())?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        let mask = attention_mask
            .to_dtype(hidden.dtype())?
            .unsqueeze(2)?
            .broadcast_as(hidden.shape())?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        Ok(summed.broadcast_div(&counts)?.to_vec2::<f32>()?)
    }
}

impl Embedder for LocalEmbedder {
    fn name(&self) -> &str {
        "local"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| ScorecardError::external("embedding", "model returned no vector"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.encode(texts)
            .map_err(|e| ScorecardError::external("embedding", format!("{:#}", e)))
    }
}

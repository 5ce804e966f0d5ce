//! Candle-based BERT sentence embedder

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde::{Deserialize, Serialize};

use crate::embedding::{normalize_embedding, Embedder, Embedding, LazyEmbedder, PoolingStrategy};
use crate::error::RagError;
use crate::models::{select_device, DevicePreference, ModelCache, ModelCell, TokenizerWrapper};

/// Configuration for the Candle BERT embedder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CandleBertConfig {
    /// HuggingFace model ID or local path
    pub model_id: String,
    pub device: DevicePreference,
    /// Longer inputs keep their first `max_length` tokens
    pub max_length: usize,
    pub pooling: PoolingStrategy,
    pub normalize: bool,
}

impl Default for CandleBertConfig {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string(),
            device: DevicePreference::Auto,
            max_length: 512,
            pooling: PoolingStrategy::Mean,
            normalize: true,
        }
    }
}

impl CandleBertConfig {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_pooling(mut self, pooling: PoolingStrategy) -> Self {
        self.pooling = pooling;
        self
    }
}

/// BERT encoder plus tokenizer, loaded once and shared immutably
pub struct CandleBertEmbedder {
    model: BertModel,
    tokenizer: TokenizerWrapper,
    config: CandleBertConfig,
    device: Device,
    hidden_size: usize,
}

impl CandleBertEmbedder {
    /// Load weights synchronously
    pub fn load(config: CandleBertConfig, cache: &ModelCache) -> Result<Self> {
        let device = select_device(config.device);
        let files = cache.resolve(&config.model_id)?;

        tracing::info!("Loading BERT embedder: {}", config.model_id);

        let bert_config: BertConfig = files.read_config()?;
        let max_length = config.max_length.min(bert_config.max_position_embeddings);
        let tokenizer = TokenizerWrapper::from_file(&files.tokenizer_file)
            .context("Failed to load tokenizer")?
            .with_max_length(max_length)?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.weights_files, DType::F32, &device)
                .context("Failed to load safetensors weights")?
        };
        let model =
            BertModel::load(vb, &bert_config).context("Failed to initialize BERT model from weights")?;

        tracing::info!(
            "BERT embedder loaded: {} layers, dim={}",
            bert_config.num_hidden_layers,
            bert_config.hidden_size
        );

        Ok(Self {
            model,
            tokenizer,
            config,
            device,
            hidden_size: bert_config.hidden_size,
        })
    }

    /// Read `config.json` and start loading weights in the background.
    ///
    /// The returned embedder reports its dimension at once; `embed` waits
    /// for the weights.
    pub fn spawn(config: CandleBertConfig, cache: ModelCache) -> Result<LazyEmbedder<Self>> {
        let dimension = checkpoint_dimension(&config.model_id, &cache)?;
        let name = config.model_id.clone();
        let cell = ModelCell::initialize(format!("embedder {}", name), move || {
            Self::load(config, &cache)
        });
        Ok(LazyEmbedder::new(name, dimension, cell))
    }

    fn encode(&self, text: &str) -> Result<Embedding> {
        let encoded = self.tokenizer.encode(text, true)?;
        if encoded.truncated {
            tracing::debug!(
                "Embedding input cut to {} tokens",
                self.tokenizer.max_length().unwrap_or(encoded.len())
            );
        }
        let (input_ids, token_type_ids, attention_mask) = encoded.to_tensors(&self.device)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        let pooled = match self.config.pooling {
            PoolingStrategy::Mean => {
                let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
                let sum = hidden.broadcast_mul(&mask)?.sum(1)?;
                let count = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
                sum.broadcast_div(&count)?
            }
            PoolingStrategy::Cls => hidden.narrow(1, 0, 1)?.squeeze(1)?,
        };

        let mut embedding: Embedding = pooled.squeeze(0)?.to_dtype(DType::F32)?.to_vec1()?;
        if self.config.normalize {
            normalize_embedding(&mut embedding);
        }
        Ok(embedding)
    }
}

/// Embedding width of a BERT checkpoint, from `config.json` alone
pub fn checkpoint_dimension(model_id: &str, cache: &ModelCache) -> Result<usize> {
    #[derive(Deserialize)]
    struct HiddenSize {
        hidden_size: usize,
    }

    let path = cache.resolve_file(model_id, "config.json")?;
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let config: HiddenSize =
        serde_json::from_str(&content).context("config.json has no hidden_size")?;
    Ok(config.hidden_size)
}

impl Embedder for CandleBertEmbedder {
    fn embed(&self, text: &str) -> crate::error::Result<Embedding> {
        self.encode(text)
            .map_err(|e| RagError::embedding(format!("{:#}", e)))
    }

    fn dimension(&self) -> usize {
        self.hidden_size
    }

    fn model_name(&self) -> &str {
        &self.config.model_id
    }
}

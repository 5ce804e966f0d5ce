//! Local decoder models run with candle
//!
//! Supports Llama-family chat checkpoints (TinyLlama) and Qwen2.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache as LlamaCache, Config as LlamaRuntimeConfig, Llama, LlamaConfig};
use candle_transformers::models::qwen2::{Config as Qwen2Config, ModelForCausalLM as Qwen2Model};
use std::sync::Mutex;

use super::config::{GenerationConfig, GeneratorConfig};
use super::postprocess::clean_completion;
use super::sampling::{apply_repetition_penalty, ban_tokens, banned_ngram_tokens, logits_processor};
use super::Generator;
use crate::error::RagError;
use crate::models::{device_label, select_device, ModelCache, ModelCell, TokenizerWrapper};
use crate::rag::context::templates::contains_role_marker;
use crate::rag::context::ChatTemplate;

/// Architecture-specific model plus its decoding state
enum DecoderModel {
    Llama {
        model: Llama,
        config: LlamaRuntimeConfig,
        cache: LlamaCache,
        dtype: DType,
    },
    Qwen2(Qwen2Model),
}

impl DecoderModel {
    /// Drop the KV cache left by the previous call
    fn reset(&mut self, device: &Device) -> Result<()> {
        match self {
            Self::Llama {
                config,
                cache,
                dtype,
                ..
            } => *cache = LlamaCache::new(true, *dtype, config, device)?,
            Self::Qwen2(model) => model.clear_kv_cache(),
        }
        Ok(())
    }

    /// Logits for the last position of `input`
    fn forward(&mut self, input: &Tensor, pos: usize) -> Result<Vec<f32>> {
        let logits = match self {
            Self::Llama { model, cache, .. } => model.forward(input, pos, cache)?,
            Self::Qwen2(model) => model.forward(input, pos)?,
        };
        let logits = logits.squeeze(0)?;
        let logits = if logits.dims().len() > 1 {
            logits.get(logits.dim(0)? - 1)?
        } else {
            logits
        };
        Ok(logits.to_dtype(DType::F32)?.to_vec1()?)
    }
}

/// Text generator backed by a local checkpoint
pub struct CandleGenerator {
    /// Mutex because the KV cache mutates during decoding
    model: Mutex<DecoderModel>,
    tokenizer: TokenizerWrapper,
    config: GeneratorConfig,
    template: ChatTemplate,
    device: Device,
    stop_token_ids: Vec<u32>,
}

impl CandleGenerator {
    /// Load synchronously
    pub fn load(config: GeneratorConfig, cache: &ModelCache) -> Result<Self> {
        let device = select_device(config.device);
        let files = cache.resolve(&config.model_id)?;
        let template = config.chat_template();

        tracing::info!("Loading generator model: {}", config.model_id);
        tracing::info!("  Device: {}", device_label(&device));
        tracing::info!("  Dtype: {}", config.dtype);
        tracing::info!("  Template: {:?}", template);

        let tokenizer = TokenizerWrapper::from_file(&files.tokenizer_file)
            .context("Failed to load tokenizer")?;

        let dtype = match config.dtype.as_str() {
            "f16" => DType::F16,
            "bf16" => DType::BF16,
            _ => DType::F32,
        };

        let raw: serde_json::Value = files.read_config()?;
        let arch = raw["architectures"]
            .get(0)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        let model_type = raw["model_type"].as_str().unwrap_or("").to_lowercase();
        tracing::info!("Detected architecture: {}, model_type: {}", arch, model_type);

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.weights_files, dtype, &device)
                .context("Failed to load model weights")?
        };

        let model = if arch.contains("qwen2") || model_type.contains("qwen2") {
            let qwen_config: Qwen2Config = files.read_config().context("Failed to parse Qwen2 config")?;
            DecoderModel::Qwen2(Qwen2Model::new(&qwen_config, vb).context("Failed to create Qwen2 model")?)
        } else if arch.contains("llama") || model_type == "llama" {
            let llama_config: LlamaConfig = files.read_config().context("Failed to parse Llama config")?;
            let runtime = llama_config.into_config(false);
            let cache = LlamaCache::new(true, dtype, &runtime, &device)?;
            let model = Llama::load(vb, &runtime).context("Failed to create Llama model")?;
            DecoderModel::Llama {
                model,
                config: runtime,
                cache,
                dtype,
            }
        } else {
            anyhow::bail!(
                "Unsupported model architecture: {} ({}). Supported: llama, qwen2",
                arch,
                model_type
            );
        };

        let stop_token_ids: Vec<u32> = ["</s>", "<|im_end|>", "<|endoftext|>"]
            .iter()
            .filter_map(|t| tokenizer.token_id(t))
            .collect();
        if stop_token_ids.is_empty() {
            tracing::warn!("No end-of-turn token in vocabulary; relying on max_new_tokens");
        }

        tracing::info!("Generator loaded successfully");

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            config,
            template,
            device,
            stop_token_ids,
        })
    }

    /// Decode up to `budget` tokens after the prompt
    fn generate(&self, prompt_tokens: Vec<u32>, budget: usize, params: &GenerationConfig) -> Result<String> {
        let prompt_len = prompt_tokens.len();

        let mut model = self
            .model
            .lock()
            .map_err(|e| anyhow::anyhow!("Model lock poisoned: {}", e))?;
        model.reset(&self.device)?;

        let mut processor = logits_processor(params);
        let mut all_tokens = prompt_tokens;
        let mut pos = 0;

        for _ in 0..budget {
            let context_size = if pos == 0 { all_tokens.len() } else { 1 };
            let start = all_tokens.len() - context_size;
            let input = Tensor::new(&all_tokens[start..], &self.device)?.unsqueeze(0)?;

            let mut logits = model.forward(&input, pos)?;
            apply_repetition_penalty(&mut logits, &all_tokens, params.repetition_penalty);
            // Only generated tokens count, so the answer may quote the context
            let banned = banned_ngram_tokens(&all_tokens[prompt_len..], params.no_repeat_ngram_size);
            ban_tokens(&mut logits, &banned);

            let next_token = processor.sample(&Tensor::new(&logits[..], &self.device)?)?;
            all_tokens.push(next_token);
            pos += context_size;

            if self.stop_token_ids.contains(&next_token) {
                tracing::debug!("Generation stopped: end-of-turn token");
                break;
            }
            let generated = self.tokenizer.decode(&all_tokens[prompt_len..], false)?;
            if contains_role_marker(&generated) {
                tracing::debug!("Generation stopped: role marker in output");
                break;
            }
        }

        tracing::debug!("Generated {} tokens", all_tokens.len() - prompt_len);
        self.tokenizer.decode(&all_tokens[prompt_len..], false)
    }
}

/// Tokens left for the answer once the prompt is in the window.
///
/// An oversized prompt is a caller problem (context budget or `top_k` too
/// large for the model), not a backend fault.
fn answer_budget(
    prompt_len: usize,
    max_seq_length: usize,
    max_new_tokens: usize,
) -> crate::error::Result<usize> {
    if prompt_len == 0 {
        return Err(RagError::invalid_config("prompt is empty after tokenization"));
    }
    if prompt_len >= max_seq_length {
        return Err(RagError::invalid_config(format!(
            "prompt has {} tokens, model limit is {}; lower max_context_chars or top_k",
            prompt_len, max_seq_length
        )));
    }
    Ok(max_new_tokens.min(max_seq_length - prompt_len))
}

impl Generator for CandleGenerator {
    fn ask(&self, question: &str, context: &str, config: &GenerationConfig) -> crate::error::Result<String> {
        config.validate()?;
        let prompt = self.template.grounded_prompt(question, context);
        let prompt_tokens = self
            .tokenizer
            .encode(&prompt, true)
            .map_err(|e| RagError::unavailable(format!("{:#}", e)))?
            .input_ids;
        let budget = answer_budget(
            prompt_tokens.len(),
            self.config.max_seq_length,
            config.max_new_tokens,
        )?;
        let raw = self
            .generate(prompt_tokens, budget, config)
            .map_err(|e| RagError::unavailable(format!("{:#}", e)))?;
        Ok(clean_completion(&raw, &prompt, self.template))
    }

    fn model_name(&self) -> &str {
        &self.config.model_id
    }
}

/// [`CandleGenerator`] loading on a background thread
pub struct LocalGenerator {
    name: String,
    cell: ModelCell<CandleGenerator>,
}

impl LocalGenerator {
    pub fn spawn(config: GeneratorConfig, cache: ModelCache) -> Self {
        let name = config.model_id.clone();
        let cell = ModelCell::initialize(format!("generator {}", name), move || {
            CandleGenerator::load(config, &cache)
        });
        Self { name, cell }
    }

    pub fn from_cell(name: impl Into<String>, cell: ModelCell<CandleGenerator>) -> Self {
        Self {
            name: name.into(),
            cell,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.cell.is_ready()
    }

    /// Block until the model is loaded
    pub fn wait_ready(&self) -> crate::error::Result<()> {
        self.cell
            .ready()
            .map(|_| ())
            .map_err(|e| RagError::unavailable(e.to_string()))
    }
}

impl Generator for LocalGenerator {
    fn ask(&self, question: &str, context: &str, config: &GenerationConfig) -> crate::error::Result<String> {
        config.validate()?;
        let model = self
            .cell
            .ready()
            .map_err(|e| RagError::unavailable(e.to_string()))?;
        model.ask(question, context, config)
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_failed_load_is_unavailable() {
        let cell: ModelCell<CandleGenerator> =
            ModelCell::initialize("generator", || Err(anyhow::anyhow!("no weights")));
        let generator = LocalGenerator::from_cell("missing", cell);

        let err = generator
            .ask("Кто посадил репку?", "", &GenerationConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenerationUnavailable);
    }

    #[test]
    fn test_invalid_config_checked_before_waiting() {
        let (_hold, gate) = std::sync::mpsc::channel::<()>();
        let cell: ModelCell<CandleGenerator> = ModelCell::initialize("generator", move || {
            gate.recv().ok();
            Err(anyhow::anyhow!("never loads"))
        });
        let generator = LocalGenerator::from_cell("slow", cell);

        let config = GenerationConfig::default().with_max_new_tokens(0);
        let err = generator.ask("вопрос", "", &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_answer_budget_fits_window() {
        assert_eq!(answer_budget(100, 2048, 256).unwrap(), 256);
        assert_eq!(answer_budget(2000, 2048, 256).unwrap(), 48);
    }

    #[test]
    fn test_oversized_prompt_is_invalid_config() {
        let err = answer_budget(2048, 2048, 256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("2048 tokens"));

        let err = answer_budget(0, 2048, 256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_offline_missing_model() {
        let root = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(root.path()).offline(true);
        let result = CandleGenerator::load(GeneratorConfig::default(), &cache);
        assert!(result.is_err());
    }

    #[test]
    #[ignore]
    fn test_tinyllama_answer_has_no_markers() {
        let cache = ModelCache::new(crate::utils::get_models_dir().unwrap());
        let generator = CandleGenerator::load(GeneratorConfig::default(), &cache).unwrap();
        let answer = generator
            .ask(
                "Кто посадил репку?",
                "1. Посадил дед репку\n",
                &GenerationConfig::greedy().with_max_new_tokens(32),
            )
            .unwrap();
        assert!(!contains_role_marker(&answer));
    }
}

//! Configuration for text generators
//!
//! [`GeneratorConfig`] describes how to load a local model;
//! [`GenerationConfig`] controls decoding for one `ask` call.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::DevicePreference;
use crate::rag::context::ChatTemplate;

/// How to load the local generator model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// HuggingFace model ID or local path
    pub model_id: String,

    pub device: DevicePreference,

    /// Model data type ("f32", "f16", "bf16")
    pub dtype: String,

    /// Role-marker convention; inferred from `model_id` when unset
    pub template: Option<ChatTemplate>,

    /// Prompts longer than this many tokens are rejected
    pub max_seq_length: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model_id: "TinyLlama/TinyLlama-1.1B-Chat-v1.0".to_string(),
            device: DevicePreference::Auto,
            dtype: "f32".to_string(),
            template: None,
            max_seq_length: 2048,
        }
    }
}

impl GeneratorConfig {
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

    pub fn with_dtype(mut self, dtype: &str) -> Self {
        self.dtype = dtype.to_string();
        self
    }

    pub fn with_template(mut self, template: ChatTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Template to use for this model
    pub fn chat_template(&self) -> ChatTemplate {
        self.template
            .unwrap_or_else(|| ChatTemplate::for_model(&self.model_id))
    }
}

/// Decoding parameters for one generation call.
///
/// `temperature == 0` selects greedy decoding. Call [`validate`](Self::validate)
/// before use; generators reject invalid values with `InvalidConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f64,

    /// Hard upper bound on generated tokens, must be positive
    pub max_new_tokens: usize,

    /// Nucleus threshold in (0, 1]
    pub top_p: f64,

    /// 1.0 disables the penalty
    pub repetition_penalty: f32,

    /// Ban repeating any n-gram of this size; 0 disables
    pub no_repeat_ngram_size: usize,

    /// Sampling seed; fixed seeds make sampled output reproducible
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_new_tokens: 512,
            top_p: 0.9,
            repetition_penalty: 1.1,
            no_repeat_ngram_size: 3,
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Deterministic decoding
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    pub fn with_no_repeat_ngram_size(mut self, size: usize) -> Self {
        self.no_repeat_ngram_size = size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(RagError::invalid_config(format!(
                "temperature must be >= 0, got {}",
                self.temperature
            )));
        }
        if self.max_new_tokens == 0 {
            return Err(RagError::invalid_config("max_new_tokens must be > 0"));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(RagError::invalid_config(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty < 1.0 {
            return Err(RagError::invalid_config(format!(
                "repetition_penalty must be >= 1, got {}",
                self.repetition_penalty
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_generation_defaults_are_valid() {
        let config = GenerationConfig::default();
        assert_eq!(config.temperature, 0.3);
        assert_eq!(config.max_new_tokens, 512);
        assert_eq!(config.no_repeat_ngram_size, 3);
        assert!(config.validate().is_ok());
        assert!(GenerationConfig::greedy().is_greedy());
    }

    #[test]
    fn test_zero_max_new_tokens_rejected() {
        let err = GenerationConfig::default()
            .with_max_new_tokens(0)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let base = GenerationConfig::default();
        assert!(base.clone().with_temperature(-0.1).validate().is_err());
        assert!(base.clone().with_temperature(f64::NAN).validate().is_err());
        assert!(base.clone().with_top_p(0.0).validate().is_err());
        assert!(base.clone().with_top_p(1.5).validate().is_err());
        assert!(base.clone().with_repetition_penalty(0.9).validate().is_err());
        assert!(base.with_top_p(1.0).validate().is_ok());
    }

    #[test]
    fn test_generator_config_template() {
        let config = GeneratorConfig::new("Qwen/Qwen2.5-0.5B-Instruct");
        assert_eq!(config.chat_template(), ChatTemplate::ChatMl);

        let config = GeneratorConfig::default().with_template(ChatTemplate::ChatMl);
        assert_eq!(config.chat_template(), ChatTemplate::ChatMl);
        assert_eq!(GeneratorConfig::default().chat_template(), ChatTemplate::Zephyr);
    }

    #[test]
    fn test_generation_config_from_toml() {
        let config: GenerationConfig = toml::from_str("temperature = 0.0\nmax_new_tokens = 64").unwrap();
        assert!(config.is_greedy());
        assert_eq!(config.max_new_tokens, 64);
        assert_eq!(config.top_p, 0.9);
    }
}

//! Thin wrapper over HuggingFace `tokenizers`

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use std::path::Path;
use tokenizers::{Tokenizer, TruncationDirection, TruncationParams, TruncationStrategy};

/// Tokenizer with an explicit length limit.
///
/// Inputs longer than `max_length` tokens keep their first `max_length`
/// tokens; the tail is dropped.
pub struct TokenizerWrapper {
    tokenizer: Tokenizer,
    max_length: Option<usize>,
}

impl TokenizerWrapper {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| anyhow!("Failed to load tokenizer {:?}: {}", path.as_ref(), e))?;

        Ok(Self {
            tokenizer,
            max_length: None,
        })
    }

    /// Enable truncation to `max_length` tokens, special tokens included
    pub fn with_max_length(mut self, max_length: usize) -> Result<Self> {
        self.tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                strategy: TruncationStrategy::LongestFirst,
                direction: TruncationDirection::Right,
                stride: 0,
            }))
            .map_err(|e| anyhow!("Failed to set truncation: {}", e))?;
        self.max_length = Some(max_length);
        Ok(self)
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<EncodedInput> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let truncated = !encoding.get_overflowing().is_empty();
        if truncated {
            tracing::debug!(
                "Input truncated to {} tokens ({} chars of source text)",
                encoding.get_ids().len(),
                text.chars().count()
            );
        }

        Ok(EncodedInput {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
            token_type_ids: encoding.get_type_ids().to_vec(),
            truncated,
        })
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow!("Decoding failed: {}", e))
    }

    /// Id of a special token such as `</s>`, if the vocabulary has it
    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }
}

/// Encoded input for a single text
#[derive(Debug, Clone)]
pub struct EncodedInput {
    pub input_ids: Vec<u32>,
    /// 1 for real tokens, 0 for padding
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
    /// Whether tokens past the length limit were dropped
    pub truncated: bool,
}

impl EncodedInput {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// `(input_ids, token_type_ids, attention_mask)` as `[1, seq_len]` tensors
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        let input_ids = Tensor::new(&self.input_ids[..], device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(&self.token_type_ids[..], device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(&self.attention_mask[..], device)?.unsqueeze(0)?;
        Ok((input_ids, token_type_ids, attention_mask))
    }
}

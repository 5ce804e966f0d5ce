//! Embedding backend implementations

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::embedding::{normalize_embedding, Embedder, Embedding};
use crate::error::Result;

pub mod candle_bert;
pub mod lazy;

pub use candle_bert::{CandleBertConfig, CandleBertEmbedder};
pub use lazy::LazyEmbedder;

/// Which embedder to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Hashed bag-of-words, no model download
    Token,
    /// BERT-family sentence encoder run with candle
    #[default]
    Bert,
}

/// Model-free embedder: hashed bag of lowercase word tokens.
///
/// Words are maximal runs of alphanumeric characters, so Cyrillic text is
/// tokenized the same way as Latin text.
pub struct TokenEmbedder {
    name: String,
    dimension: usize,
}

impl TokenEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            name: format!("token-hash-{}", dimension),
            dimension,
        }
    }

    fn generate_embedding(&self, text: &str) -> Embedding {
        let mut embedding = vec![0.0; self.dimension];

        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();

        if tokens.is_empty() || self.dimension == 0 {
            return embedding;
        }

        for token in &tokens {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() % self.dimension as u64) as usize;
            embedding[idx] += 1.0;
        }

        // TF weighting
        let total_tokens = tokens.len() as f32;
        for val in embedding.iter_mut() {
            *val /= total_tokens;
        }

        normalize_embedding(&mut embedding);
        embedding
    }
}

impl Embedder for TokenEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.generate_embedding(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

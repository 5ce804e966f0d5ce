//! Text embedding
//!
//! Turns text into fixed-size vectors. Every backend is deterministic for a
//! fixed loaded model and reports its dimension before the first `embed`
//! call, so collections can be sized up front.

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod backends;

pub use backends::*;

/// Represents an embedding vector
pub type Embedding = Vec<f32>;

/// How token states are reduced to one sentence vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    /// Mean over non-padding tokens
    #[default]
    Mean,
    /// First ([CLS]) token
    Cls,
}

/// Trait for embedding models
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed several texts, preserving order
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Normalize an embedding vector (L2 normalization)
pub fn normalize_embedding(embedding: &mut Embedding) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm > 0.0 {
        for val in embedding.iter_mut() {
            *val /= norm;
        }
    }
}

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot_product / (norm_a * norm_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_embedding() {
        let mut emb = vec![3.0, 4.0];
        normalize_embedding(&mut emb);

        // 3-4-5 triangle
        assert!((emb[0] - 0.6).abs() < 1e-6);
        assert!((emb[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let mut emb = vec![0.0; 4];
        normalize_embedding(&mut emb);
        assert_eq!(emb, vec![0.0; 4]);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let c = vec![1.0, 0.0];
        let d = vec![0.0, 1.0];
        assert!(cosine_similarity(&c, &d).abs() < 1e-6);

        assert_eq!(cosine_similarity(&a, &c), 0.0);
    }
}

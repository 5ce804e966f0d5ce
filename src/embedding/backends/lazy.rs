//! Embedder whose weights load in the background

use crate::embedding::{Embedder, Embedding};
use crate::error::{RagError, Result};
use crate::models::ModelCell;

/// Embedder behind a readiness gate.
///
/// `dimension` is known up front; `embed` blocks until the wrapped model is
/// ready and fails with `RagError::Embedding` if loading failed.
pub struct LazyEmbedder<E> {
    name: String,
    dimension: usize,
    cell: ModelCell<E>,
}

impl<E: Embedder + 'static> LazyEmbedder<E> {
    pub fn new(name: impl Into<String>, dimension: usize, cell: ModelCell<E>) -> Self {
        Self {
            name: name.into(),
            dimension,
            cell,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.cell.is_ready()
    }

    /// Block until weights are loaded
    pub fn wait_ready(&self) -> Result<()> {
        self.cell
            .ready()
            .map(|_| ())
            .map_err(|e| RagError::embedding(e.to_string()))
    }
}

impl<E: Embedder + 'static> Embedder for LazyEmbedder<E> {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let model = self
            .cell
            .ready()
            .map_err(|e| RagError::embedding(e.to_string()))?;
        let embedding = model.embed(text)?;
        if embedding.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

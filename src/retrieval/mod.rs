//! Vector indexes
//!
//! Named collections of (id, vector, metadata) triples with nearest-neighbour
//! queries. Two backends share the [`VectorIndex`] trait: an exact
//! in-process index and a client for a Chroma server.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::{Unit, TEXT_KEY};
use crate::error::Result;

pub mod chroma;
pub mod memory;

pub use chroma::{ChromaConfig, ChromaIndex};
pub use memory::InMemoryIndex;

/// Distance function of a collection; lower is more similar for all three
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`
    #[default]
    Cosine,
    /// Squared Euclidean distance
    L2,
    /// `1 - a·b`
    #[serde(rename = "ip")]
    #[value(name = "ip")]
    InnerProduct,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => 1.0 - crate::embedding::cosine_similarity(a, b),
            Self::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::InnerProduct => 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }

    /// Name used by Chroma's `hnsw:space` collection setting
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
            Self::InnerProduct => "ip",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cosine" => Some(Self::Cosine),
            "l2" => Some(Self::L2),
            "ip" => Some(Self::InnerProduct),
            _ => None,
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    /// Lower is more similar
    pub distance: f32,
    pub metadata: BTreeMap<String, String>,
}

impl QueryHit {
    /// Stored unit text, empty if the metadata lacks it
    pub fn text(&self) -> &str {
        self.metadata.get(TEXT_KEY).map(String::as_str).unwrap_or("")
    }
}

/// Storage backend for unit vectors
pub trait VectorIndex: Send + Sync {
    /// Fails with `AlreadyExists` if the name is taken
    fn create_collection(&self, name: &str, metric: DistanceMetric) -> Result<()>;

    /// Add one unit.
    ///
    /// Fails with `NotFound`, `DimensionMismatch` (against the dimension set
    /// by the first insert) or `DuplicateId`; a failed insert stores nothing.
    fn insert(&self, collection: &str, unit: &Unit, vector: &[f32]) -> Result<()>;

    /// Up to `k` nearest units, ascending distance, ties in insertion order
    fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<QueryHit>>;

    /// Drop a collection; deleting a missing collection succeeds
    fn delete_collection(&self, name: &str) -> Result<()>;

    fn count(&self, collection: &str) -> Result<usize>;

    fn list_collections(&self) -> Result<Vec<String>>;

    /// Backend liveness check
    fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_distances() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];

        assert!(DistanceMetric::Cosine.distance(&a, &a).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::L2.distance(&a, &b) - 2.0).abs() < 1e-6);
        assert!((DistanceMetric::InnerProduct.distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_names() {
        for metric in [DistanceMetric::Cosine, DistanceMetric::L2, DistanceMetric::InnerProduct] {
            assert_eq!(DistanceMetric::parse(metric.as_str()), Some(metric));
        }
        assert_eq!(DistanceMetric::default(), DistanceMetric::Cosine);
    }
}

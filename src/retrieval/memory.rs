//! Exact in-process vector index

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::data::Unit;
use crate::error::{RagError, Result};
use crate::retrieval::{DistanceMetric, QueryHit, VectorIndex};

struct Entry {
    id: String,
    vector: Vec<f32>,
    metadata: BTreeMap<String, String>,
}

struct Collection {
    metric: DistanceMetric,
    dimension: Option<usize>,
    entries: Vec<Entry>,
    ids: HashSet<String>,
}

/// Brute-force index kept in memory.
///
/// Queries scan every vector, so results are exact and ties keep insertion
/// order. Many readers may query while one writer ingests.
#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| RagError::Backend("index lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| RagError::Backend("index lock poisoned".into()))
    }

    /// Dimension fixed by the first insert, if any
    pub fn dimension(&self, collection: &str) -> Result<Option<usize>> {
        let collections = self.read()?;
        let col = collections
            .get(collection)
            .ok_or_else(|| RagError::NotFound(collection.to_string()))?;
        Ok(col.dimension)
    }
}

impl VectorIndex for InMemoryIndex {
    fn create_collection(&self, name: &str, metric: DistanceMetric) -> Result<()> {
        let mut collections = self.write()?;
        if collections.contains_key(name) {
            return Err(RagError::AlreadyExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Collection {
                metric,
                dimension: None,
                entries: Vec::new(),
                ids: HashSet::new(),
            },
        );
        tracing::debug!("Created collection '{}' ({})", name, metric);
        Ok(())
    }

    fn insert(&self, collection: &str, unit: &Unit, vector: &[f32]) -> Result<()> {
        let mut collections = self.write()?;
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::NotFound(collection.to_string()))?;

        if let Some(expected) = col.dimension {
            if vector.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        if col.ids.contains(&unit.id) {
            return Err(RagError::DuplicateId {
                collection: collection.to_string(),
                id: unit.id.clone(),
            });
        }

        col.dimension.get_or_insert(vector.len());
        col.ids.insert(unit.id.clone());
        col.entries.push(Entry {
            id: unit.id.clone(),
            vector: vector.to_vec(),
            metadata: unit.index_metadata(),
        });
        Ok(())
    }

    fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        let collections = self.read()?;
        let col = collections
            .get(collection)
            .ok_or_else(|| RagError::NotFound(collection.to_string()))?;

        if let Some(expected) = col.dimension {
            if vector.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(f32, &Entry)> = col
            .entries
            .iter()
            .map(|entry| (col.metric.distance(vector, &entry.vector), entry))
            .collect();
        // Stable sort: equal distances stay in insertion order
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, entry)| QueryHit {
                id: entry.id.clone(),
                distance,
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    fn delete_collection(&self, name: &str) -> Result<()> {
        if self.write()?.remove(name).is_some() {
            tracing::debug!("Deleted collection '{}'", name);
        }
        Ok(())
    }

    fn count(&self, collection: &str) -> Result<usize> {
        self.read()?
            .get(collection)
            .map(|col| col.entries.len())
            .ok_or_else(|| RagError::NotFound(collection.to_string()))
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

//! Corpus units and segmentation
//!
//! A [`Unit`] is one addressable passage: an article of a legal code or a
//! sentence of a narrative. Units are what gets embedded and indexed.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub mod narrative;
pub mod segment;

pub use narrative::{lines_to_units, ordinal_units, split_sentences, REPKA};
pub use segment::{segment, split_articles_to_json, BoundaryPattern};

/// Metadata key holding the unit text in the index
pub const TEXT_KEY: &str = "text";
/// Metadata key holding the article label for segmented legal text
pub const ARTICLE_KEY: &str = "article_number";

/// One indexable passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unique within a collection
    pub id: String,
    /// Source text, trimmed
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Unit {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Flat metadata as stored in the index, `text` included
    pub fn index_metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = self.metadata.clone();
        metadata.insert(TEXT_KEY.to_string(), self.text.clone());
        metadata
    }
}

/// Ordered id → text mapping produced by segmentation.
///
/// Iteration follows first appearance in the source. Inserting an existing
/// id replaces its text in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segments {
    entries: Vec<(String, String)>,
    positions: HashMap<String, usize>,
}

impl Segments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns the replaced text, if any
    pub fn insert(&mut self, id: String, text: String) -> Option<String> {
        match self.positions.get(&id) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos].1, text)),
            None => {
                self.positions.insert(id.clone(), self.entries.len());
                self.entries.push((id, text));
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.positions
            .get(id)
            .map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(id, text)| (id.as_str(), text.as_str()))
    }

    /// Units tagged with their article label
    pub fn into_units(self) -> Vec<Unit> {
        self.entries
            .into_iter()
            .map(|(id, text)| Unit::new(id.clone(), text).with_metadata(ARTICLE_KEY, id))
            .collect()
    }
}

impl Serialize for Segments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, text) in &self.entries {
            map.serialize_entry(id, text)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Segments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SegmentsVisitor;

        impl<'de> Visitor<'de> for SegmentsVisitor {
            type Value = Segments;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of unit id to text")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Segments, A::Error> {
                let mut segments = Segments::new();
                while let Some((id, text)) = access.next_entry::<String, String>()? {
                    segments.insert(id, text);
                }
                Ok(segments)
            }
        }

        deserializer.deserialize_map(SegmentsVisitor)
    }
}

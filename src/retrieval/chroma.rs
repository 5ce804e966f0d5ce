//! Client for a Chroma vector database server (REST API v1)
//!
//! Every call is one blocking HTTP request. Transport failures surface as
//! `RagError::Connectivity` right away; nothing is retried.

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::data::Unit;
use crate::error::{RagError, Result};
use crate::retrieval::{DistanceMetric, QueryHit, VectorIndex};

/// Where the Chroma server lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromaConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            timeout_secs: 30,
        }
    }
}

impl ChromaConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
    name: String,
    #[serde(default)]
    metadata: Option<BTreeMap<String, Value>>,
}

impl CollectionInfo {
    fn metric(&self) -> DistanceMetric {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("hnsw:space"))
            .and_then(Value::as_str)
            .and_then(DistanceMetric::parse)
            .unwrap_or(DistanceMetric::L2)
    }
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<BTreeMap<String, Value>>>>>,
}

/// [`VectorIndex`] backed by a remote Chroma server
pub struct ChromaIndex {
    client: Client,
    base_url: String,
}

impl ChromaIndex {
    pub fn new(config: &ChromaConfig) -> Result<Self> {
        Self::with_base_url(config.base_url(), Duration::from_secs(config.timeout_secs))
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Backend(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn collection(&self, name: &str) -> Result<CollectionInfo> {
        let response = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .map_err(RagError::from_transport)?;
        let response = check(response, name)?;
        response.json().map_err(RagError::from_transport)
    }

    /// Dimension of stored vectors, read from one stored embedding
    fn stored_dimension(&self, collection_id: &str) -> Result<Option<usize>> {
        let reply: GetResponse = self.post_json(
            &format!("/collections/{}/get", collection_id),
            &json!({ "limit": 1, "include": ["embeddings"] }),
            collection_id,
        )?;
        Ok(reply
            .embeddings
            .and_then(|e| e.into_iter().next())
            .map(|v| v.len()))
    }

    fn contains_id(&self, collection_id: &str, id: &str) -> Result<bool> {
        let reply: GetResponse = self.post_json(
            &format!("/collections/{}/get", collection_id),
            &json!({ "ids": [id], "include": [] }),
            collection_id,
        )?;
        Ok(!reply.ids.is_empty())
    }

    fn count_by_id(&self, collection_id: &str) -> Result<usize> {
        let response = self
            .client
            .get(self.url(&format!("/collections/{}/count", collection_id)))
            .send()
            .map_err(RagError::from_transport)?;
        check(response, collection_id)?
            .json()
            .map_err(RagError::from_transport)
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Value,
        collection: &str,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(RagError::from_transport)?;
        check(response, collection)?
            .json()
            .map_err(RagError::from_transport)
    }
}

/// Map an HTTP reply to the error taxonomy.
///
/// Older Chroma servers report missing or duplicate collections as 500s,
/// so the body text is inspected as well as the status.
fn check(response: Response, collection: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let lowered = body.to_lowercase();

    if status == StatusCode::CONFLICT
        || lowered.contains("already exists")
        || lowered.contains("uniqueconstrainterror")
    {
        Err(RagError::AlreadyExists(collection.to_string()))
    } else if status == StatusCode::NOT_FOUND || lowered.contains("does not exist") {
        Err(RagError::NotFound(collection.to_string()))
    } else {
        Err(RagError::Backend(format!("HTTP {}: {}", status, body)))
    }
}

fn flatten_metadata(raw: Option<BTreeMap<String, Value>>) -> BTreeMap<String, String> {
    raw.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, value)
        })
        .collect()
}

impl VectorIndex for ChromaIndex {
    fn create_collection(&self, name: &str, metric: DistanceMetric) -> Result<()> {
        let _: Value = self.post_json(
            "/collections",
            &json!({
                "name": name,
                "metadata": { "hnsw:space": metric.as_str() },
                "get_or_create": false,
            }),
            name,
        )?;
        tracing::info!("Created Chroma collection '{}' ({})", name, metric);
        Ok(())
    }

    fn insert(&self, collection: &str, unit: &Unit, vector: &[f32]) -> Result<()> {
        let info = self.collection(collection)?;

        if let Some(expected) = self.stored_dimension(&info.id)? {
            if vector.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        if self.contains_id(&info.id, &unit.id)? {
            return Err(RagError::DuplicateId {
                collection: collection.to_string(),
                id: unit.id.clone(),
            });
        }

        let _: Value = self.post_json(
            &format!("/collections/{}/add", info.id),
            &json!({
                "ids": [unit.id],
                "embeddings": [vector],
                "metadatas": [unit.index_metadata()],
                "documents": [unit.text],
            }),
            collection,
        )?;
        tracing::debug!("Inserted '{}' into '{}'", unit.id, info.name);
        Ok(())
    }

    fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        let info = self.collection(collection)?;
        let available = self.count_by_id(&info.id)?;
        let n_results = k.min(available);
        if n_results == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.stored_dimension(&info.id)? {
            if vector.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let reply: QueryResponse = self.post_json(
            &format!("/collections/{}/query", info.id),
            &json!({
                "query_embeddings": [vector],
                "n_results": n_results,
                "include": ["metadatas", "distances"],
            }),
            collection,
        )?;

        let ids = reply.ids.into_iter().next().unwrap_or_default();
        let distances = reply
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let metadatas = reply
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default();

        if distances.len() != ids.len() {
            return Err(RagError::Backend(format!(
                "query returned {} ids but {} distances",
                ids.len(),
                distances.len()
            )));
        }

        let mut metadatas = metadatas.into_iter();
        let mut hits: Vec<QueryHit> = ids
            .into_iter()
            .zip(distances)
            .map(|(id, distance)| QueryHit {
                id,
                distance,
                metadata: flatten_metadata(metadatas.next().flatten()),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        tracing::debug!("Chroma query on '{}' ({}) returned {} hits", collection, info.metric(), hits.len());
        Ok(hits)
    }

    fn delete_collection(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/collections/{}", name)))
            .send()
            .map_err(RagError::from_transport)?;
        match check(response, name) {
            Ok(_) | Err(RagError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let info = self.collection(collection)?;
        self.count_by_id(&info.id)
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/collections"))
            .send()
            .map_err(RagError::from_transport)?;
        let collections: Vec<CollectionInfo> = check(response, "")?
            .json()
            .map_err(RagError::from_transport)?;
        Ok(collections.into_iter().map(|c| c.name).collect())
    }

    fn heartbeat(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/heartbeat"))
            .send()
            .map_err(RagError::from_transport)?;
        check(response, "")?;
        Ok(())
    }

    fn name(&self) -> &str {
        "chroma"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let config = ChromaConfig {
            host: "db".into(),
            port: 9000,
            timeout_secs: 5,
        };
        assert_eq!(config.base_url(), "http://db:9000");
    }

    #[test]
    fn test_flatten_metadata() {
        let mut raw = BTreeMap::new();
        raw.insert("text".to_string(), Value::String("репка".into()));
        raw.insert("rank".to_string(), json!(3));
        let flat = flatten_metadata(Some(raw));
        assert_eq!(flat["text"], "репка");
        assert_eq!(flat["rank"], "3");
    }

    #[test]
    fn test_unreachable_host_is_connectivity_error() {
        // Port 9 (discard) is closed on test machines
        let index = ChromaIndex::with_base_url("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = index.heartbeat().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connectivity);
    }
}

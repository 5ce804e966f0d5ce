//! ChromaIndex against a mocked Chroma REST API
//!
//! The index uses a blocking HTTP client, so every call runs on the blocking
//! pool while the mock server runs on the test runtime.

use std::time::Duration;

use lexrag::data::Unit;
use lexrag::error::ErrorKind;
use lexrag::retrieval::{ChromaIndex, DistanceMetric, VectorIndex};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Build inside the blocking task; the blocking client must not be created
/// or dropped on the async runtime.
fn index_for(uri: &str) -> ChromaIndex {
    ChromaIndex::with_base_url(uri, Duration::from_secs(5)).unwrap()
}

async fn mount_collection(server: &MockServer, count: usize, stored: Vec<Vec<f32>>) {
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/repka"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c1",
            "name": "repka",
            "metadata": { "hnsw:space": "cosine" }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/collections/c1/count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(count)))
        .mount(server)
        .await;

    let ids: Vec<String> = (0..stored.len().min(1)).map(|i| i.to_string()).collect();
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c1/get"))
        .and(body_partial_json(json!({ "limit": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ids": ids,
            "embeddings": stored.into_iter().take(1).collect::<Vec<_>>(),
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_create_conflict_is_already_exists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections"))
        .and(body_partial_json(json!({
            "name": "repka",
            "metadata": { "hnsw:space": "ip" }
        })))
        .respond_with(ResponseTemplate::new(409).set_body_string("collection repka already exists"))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || {
        let index = index_for(&uri);
        index.create_collection("repka", DistanceMetric::InnerProduct)
    })
    .await
    .unwrap()
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn test_legacy_unique_constraint_is_already_exists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("UniqueConstraintError('Collection repka')"),
        )
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || {
        let index = index_for(&uri);
        index.create_collection("repka", DistanceMetric::Cosine)
    })
    .await
    .unwrap()
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn test_query_sorts_hits_and_flattens_metadata() {
    let server = MockServer::start().await;
    mount_collection(&server, 2, vec![vec![0.6, 0.8]]).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c1/query"))
        .and(body_partial_json(json!({ "n_results": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ids": [["1", "0"]],
            "distances": [[0.5, 0.1]],
            "metadatas": [[
                { "text": "Позвал дед на помощь бабку", "position": 1 },
                { "text": "Посадил дед репку" }
            ]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let hits = tokio::task::spawn_blocking(move || index_for(&uri).query("repka", &[1.0, 0.0], 5))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "0");
    assert_eq!(hits[0].text(), "Посадил дед репку");
    assert!(hits[0].distance <= hits[1].distance);
    assert_eq!(hits[1].metadata.get("position").unwrap(), "1");
}

#[tokio::test]
async fn test_query_wrong_dimension() {
    let server = MockServer::start().await;
    mount_collection(&server, 1, vec![vec![0.6, 0.8]]).await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || index_for(&uri).query("repka", &[1.0, 0.0, 0.0], 1))
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    assert_eq!(err.to_string(), "Dimension mismatch: expected 2, got 3");
}

#[tokio::test]
async fn test_query_empty_collection_skips_search() {
    let server = MockServer::start().await;
    mount_collection(&server, 0, vec![]).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c1/query"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let uri = server.uri();
    let hits = tokio::task::spawn_blocking(move || index_for(&uri).query("repka", &[1.0, 0.0], 3))
        .await
        .unwrap()
        .unwrap();

    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_insert_duplicate_id_sends_nothing() {
    let server = MockServer::start().await;
    mount_collection(&server, 1, vec![vec![0.6, 0.8]]).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c1/get"))
        .and(body_partial_json(json!({ "ids": ["0"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ids": ["0"] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c1/add"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .expect(0)
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || {
        let index = index_for(&uri);
        index.insert("repka", &Unit::new("0", "Посадил дед репку"), &[1.0, 0.0])
    })
    .await
    .unwrap()
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DuplicateId);
}

#[tokio::test]
async fn test_insert_sends_text_metadata() {
    let server = MockServer::start().await;
    mount_collection(&server, 0, vec![]).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c1/get"))
        .and(body_partial_json(json!({ "ids": ["2"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ids": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c1/add"))
        .and(body_partial_json(json!({
            "ids": ["2"],
            "metadatas": [{ "text": "Позвал дед на помощь бабку" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    tokio::task::spawn_blocking(move || {
        let index = index_for(&uri);
        index.insert("repka", &Unit::new("2", "Позвал дед на помощь бабку"), &[0.0, 1.0])
    })
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_delete_missing_collection_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/collections/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Collection gone does not exist"))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    tokio::task::spawn_blocking(move || index_for(&uri).delete_collection("gone"))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_missing_collection_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/absent"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("ValueError: Collection absent does not exist."),
        )
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || index_for(&uri).count("absent"))
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_heartbeat_and_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/heartbeat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "nanosecond heartbeat": 1 })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "c1", "name": "repka", "metadata": null },
            { "id": "c2", "name": "gk_rf" }
        ])))
        .mount(&server)
        .await;

    let uri = server.uri();
    let names = tokio::task::spawn_blocking(move || {
        let index = index_for(&uri);
        index.heartbeat()?;
        index.list_collections()
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(names, vec!["repka", "gk_rf"]);
}

//! `SqliteVectorStore` against the `VectorStore` contract.

use std::collections::BTreeSet;

use tempfile::TempDir;
use toolgate::db;
use toolgate::migrate::run_migrations;
use toolgate::sqlite_store::SqliteVectorStore;
use toolgate_core::collection::CollectionKey;
use toolgate_core::error::GatewayError;
use toolgate_core::models::{Chunk, Identity};
use toolgate_core::store::{AccessFilter, VectorPoint, VectorStore};

// ─── Helpers ────────────────────────────────────────────────────────

async fn open_store(tmp: &TempDir) -> SqliteVectorStore {
    let pool = db::connect_path(&tmp.path().join("vectors.sqlite"))
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    SqliteVectorStore::new(pool)
}

fn point(id: &str, vector: Vec<f32>, users: &[&str], roles: &[&str]) -> VectorPoint {
    let set = |items: &[&str]| -> BTreeSet<String> { items.iter().map(|s| s.to_string()).collect() };
    VectorPoint {
        id: id.to_string(),
        vector,
        payload: Chunk {
            id: id.to_string(),
            text: format!("text of {}", id),
            source: format!("{}.txt", id),
            source_type: "text".to_string(),
            chunk_index: 1,
            allowed_users: set(users),
            allowed_roles: set(roles),
            uploaded_by: "u1".to_string(),
            corpus_id: "demo".to_string(),
            embedding_model_id: "m4".to_string(),
        },
    }
}

fn filter(user: &str, roles: &[&str]) -> AccessFilter {
    AccessFilter::for_identity(&Identity::new(user, roles.iter().copied()))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dimension_mismatch_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let key = CollectionKey::new("demo", "m4");

    let err = store
        .upsert(
            &key,
            4,
            vec![
                point("a", vec![1.0, 0.0, 0.0, 0.0], &["u1"], &[]),
                point("b", vec![1.0, 0.0, 0.0], &["u1"], &[]),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::DimensionMismatch { .. }));
    assert_eq!(store.collection_dims(&key).await.unwrap(), None);
    assert_eq!(store.point_count(&key).await.unwrap(), 0);

    store
        .upsert(&key, 4, vec![point("a", vec![1.0, 0.0, 0.0, 0.0], &["u1"], &[])])
        .await
        .unwrap();
    assert_eq!(store.collection_dims(&key).await.unwrap(), Some(4));

    // An existing collection keeps its declared size.
    let err = store
        .upsert(
            &key,
            5,
            vec![point("c", vec![1.0, 0.0, 0.0, 0.0, 0.0], &["u1"], &[])],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::DimensionMismatch { .. }));
    assert_eq!(store.point_count(&key).await.unwrap(), 1);
}

#[tokio::test]
async fn test_upsert_is_last_write_wins() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let key = CollectionKey::new("demo", "m4");

    store
        .upsert(&key, 4, vec![point("a", vec![1.0, 0.0, 0.0, 0.0], &["u1"], &[])])
        .await
        .unwrap();
    let outcome = store
        .upsert(&key, 4, vec![point("a", vec![0.0, 1.0, 0.0, 0.0], &["u2"], &[])])
        .await
        .unwrap();
    assert_eq!(outcome.succeeded_ids, vec!["a".to_string()]);
    assert_eq!(store.point_count(&key).await.unwrap(), 1);

    // The access rows were replaced along with the vector.
    let old_owner = store
        .search(&key, &[0.0, 1.0, 0.0, 0.0], &filter("u1", &[]), 5)
        .await
        .unwrap();
    assert!(old_owner.is_empty());
    let new_owner = store
        .search(&key, &[0.0, 1.0, 0.0, 0.0], &filter("u2", &[]), 5)
        .await
        .unwrap();
    assert_eq!(new_owner.len(), 1);
    assert!((new_owner[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_filter_applies_before_top_k() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let key = CollectionKey::new("demo", "m4");

    store
        .upsert(
            &key,
            4,
            vec![
                // Best matches, hidden from u1.
                point("h1", vec![1.0, 0.0, 0.0, 0.0], &[], &["Finance"]),
                point("h2", vec![0.9, 0.1, 0.0, 0.0], &["u9"], &[]),
                point("h3", vec![0.8, 0.2, 0.0, 0.0], &[], &["Finance"]),
                // Weaker matches, visible to u1 directly or through a role.
                point("v1", vec![0.5, 0.5, 0.0, 0.0], &["u1"], &[]),
                point("v2", vec![0.1, 0.9, 0.0, 0.0], &[], &["Engineering"]),
            ],
        )
        .await
        .unwrap();

    let hits = store
        .search(
            &key,
            &[1.0, 0.0, 0.0, 0.0],
            &filter("u1", &["Engineering"]),
            2,
        )
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["v1", "v2"]);
    assert!(hits[0].score > hits[1].score);

    let finance = store
        .search(&key, &[1.0, 0.0, 0.0, 0.0], &filter("u5", &["Finance"]), 1)
        .await
        .unwrap();
    assert_eq!(finance.len(), 1);
    assert_eq!(finance[0].id, "h1");
    assert_eq!(finance[0].payload.source, "h1.txt");
}

#[tokio::test]
async fn test_search_edge_cases() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let key = CollectionKey::new("demo", "m4");

    let missing = store
        .search(&key, &[1.0, 0.0, 0.0, 0.0], &filter("u1", &[]), 5)
        .await
        .unwrap();
    assert!(missing.is_empty());

    store
        .upsert(&key, 4, vec![point("a", vec![1.0, 0.0, 0.0, 0.0], &["u1"], &[])])
        .await
        .unwrap();
    let err = store
        .search(&key, &[1.0, 0.0], &filter("u1", &[]), 5)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn test_collections_are_isolated_and_deletable() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let demo = CollectionKey::new("demo", "m4");
    let other = CollectionKey::new("other", "m4");

    store
        .upsert(&demo, 4, vec![point("a", vec![1.0, 0.0, 0.0, 0.0], &["u1"], &[])])
        .await
        .unwrap();
    store
        .upsert(&other, 4, vec![point("a", vec![0.0, 0.0, 1.0, 0.0], &["u1"], &[])])
        .await
        .unwrap();

    assert!(store.delete_collection(&demo).await.unwrap());
    assert!(!store.delete_collection(&demo).await.unwrap());
    assert_eq!(store.collection_dims(&demo).await.unwrap(), None);
    assert!(store
        .search(&demo, &[1.0, 0.0, 0.0, 0.0], &filter("u1", &[]), 5)
        .await
        .unwrap()
        .is_empty());

    assert_eq!(store.point_count(&other).await.unwrap(), 1);
    assert_eq!(store.name(), "sqlite");
}

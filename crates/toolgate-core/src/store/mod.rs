//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only way the retrieval pipeline reads
//! or writes vectors. Backends are interchangeable behind it; the process
//! picks one from configuration at startup.
//!
//! # Contract
//!
//! | Method | Behaviour |
//! |--------|-----------|
//! | [`upsert`](VectorStore::upsert) | Create the collection lazily at `dims`; reject any vector of another size with `DimensionMismatch` before writing anything |
//! | [`search`](VectorStore::search) | Apply the [`AccessFilter`] inside the store, then return the top `k` by cosine similarity |
//! | [`collection_dims`](VectorStore::collection_dims) | Declared size of an existing collection |
//! | [`delete_collection`](VectorStore::delete_collection) | Drop a collection and all its points |
//!
//! Writes are last-write-wins per point id. Implementations must be
//! `Send + Sync`.

pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;

use crate::collection::CollectionKey;
use crate::error::GatewayResult;
use crate::models::{Chunk, Identity};

/// One point to write.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Chunk,
}

/// A point returned from a search, with its cosine similarity.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Chunk,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub succeeded_ids: Vec<String>,
    pub failed_ids: Vec<String>,
}

impl UpsertOutcome {
    pub fn extend(&mut self, other: UpsertOutcome) {
        self.succeeded_ids.extend(other.succeeded_ids);
        self.failed_ids.extend(other.failed_ids);
    }
}

/// Payload predicate: `allowed_users ∋ user OR allowed_roles ∩ roles ≠ ∅`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessFilter {
    pub user_id: String,
    pub roles: BTreeSet<String>,
}

impl AccessFilter {
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            roles: identity.roles.clone(),
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        chunk.allowed_users.contains(&self.user_id)
            || chunk.allowed_roles.iter().any(|r| self.roles.contains(r))
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs and `/health`.
    fn name(&self) -> &'static str;

    /// Write points into `collection`, creating it at `dims` if absent.
    async fn upsert(
        &self,
        collection: &CollectionKey,
        dims: usize,
        points: Vec<VectorPoint>,
    ) -> GatewayResult<UpsertOutcome>;

    /// Top `k` points visible through `filter`, best first. An absent
    /// collection yields no results.
    async fn search(
        &self,
        collection: &CollectionKey,
        vector: &[f32],
        filter: &AccessFilter,
        k: usize,
    ) -> GatewayResult<Vec<ScoredPoint>>;

    async fn collection_dims(&self, collection: &CollectionKey) -> GatewayResult<Option<usize>>;

    /// Returns whether the collection existed.
    async fn delete_collection(&self, collection: &CollectionKey) -> GatewayResult<bool>;
}

/// Reject the batch if any vector disagrees with the collection size.
pub fn check_dims(
    collection: &CollectionKey,
    expected: usize,
    points: &[VectorPoint],
) -> GatewayResult<()> {
    match points.iter().find(|p| p.vector.len() != expected) {
        Some(p) => Err(crate::error::GatewayError::DimensionMismatch {
            collection: collection.to_string(),
            expected,
            actual: p.vector.len(),
        }),
        None => Ok(()),
    }
}

/// Sort by score descending, id ascending, and keep the first `k`.
pub fn rank_points(points: &mut Vec<ScoredPoint>, k: usize) {
    points.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    points.truncate(k);
}

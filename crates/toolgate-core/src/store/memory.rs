//! In-memory [`VectorStore`] for tests and single-process deployments.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over the points that pass the access
//! filter, so `k` always counts visible points only.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::collection::CollectionKey;
use crate::embedding::cosine_similarity;
use crate::error::{GatewayError, GatewayResult};

use super::{
    check_dims, rank_points, AccessFilter, ScoredPoint, UpsertOutcome, VectorPoint, VectorStore,
};

struct Collection {
    dims: usize,
    points: HashMap<String, VectorPoint>,
}

pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn point_count(&self, collection: &CollectionKey) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection.as_str()).map_or(0, |c| c.points.len()))
            .unwrap_or(0)
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> GatewayError {
    GatewayError::Storage("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(
        &self,
        collection: &CollectionKey,
        dims: usize,
        points: Vec<VectorPoint>,
    ) -> GatewayResult<UpsertOutcome> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let expected = collections
            .get(collection.as_str())
            .map_or(dims, |c| c.dims);
        check_dims(collection, expected, &points)?;

        let entry = collections
            .entry(collection.as_str().to_string())
            .or_insert_with(|| Collection {
                dims: expected,
                points: HashMap::new(),
            });
        let mut outcome = UpsertOutcome::default();
        for point in points {
            outcome.succeeded_ids.push(point.id.clone());
            entry.points.insert(point.id.clone(), point);
        }
        Ok(outcome)
    }

    async fn search(
        &self,
        collection: &CollectionKey,
        vector: &[f32],
        filter: &AccessFilter,
        k: usize,
    ) -> GatewayResult<Vec<ScoredPoint>> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(stored) = collections.get(collection.as_str()) else {
            return Ok(Vec::new());
        };
        if vector.len() != stored.dims {
            return Err(GatewayError::DimensionMismatch {
                collection: collection.to_string(),
                expected: stored.dims,
                actual: vector.len(),
            });
        }
        let mut hits: Vec<ScoredPoint> = stored
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        rank_points(&mut hits, k);
        Ok(hits)
    }

    async fn collection_dims(&self, collection: &CollectionKey) -> GatewayResult<Option<usize>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(collection.as_str()).map(|c| c.dims))
    }

    async fn delete_collection(&self, collection: &CollectionKey) -> GatewayResult<bool> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        Ok(collections.remove(collection.as_str()).is_some())
    }
}

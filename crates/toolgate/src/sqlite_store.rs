//! SQLite-backed [`VectorStore`] implementation.
//!
//! Vectors live as little-endian `f32` BLOBs in `vector_points`, next to the
//! chunk payload as JSON. Each point's `allowed_users` / `allowed_roles` are
//! exploded into `vector_point_access` so the access filter runs in SQL:
//! only rows the identity may see are loaded, scored, and ranked.
//!
//! Upserts are transactional. The collection's declared dimension is read
//! (or created) inside the same transaction as the point writes, so a
//! `DimensionMismatch` leaves the collection untouched.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use toolgate_core::collection::CollectionKey;
use toolgate_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use toolgate_core::error::{GatewayError, GatewayResult};
use toolgate_core::models::Chunk;
use toolgate_core::store::memory::InMemoryVectorStore;
use toolgate_core::store::{
    check_dims, rank_points, AccessFilter, ScoredPoint, UpsertOutcome, VectorPoint, VectorStore,
};

use crate::access_store::now_ts;
use crate::config::{Config, StoreKind};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn point_count(&self, collection: &CollectionKey) -> GatewayResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_points WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(GatewayError::storage)?;
        Ok(count as usize)
    }
}

/// Build the configured process-wide store.
pub fn open_store(config: &Config, pool: &SqlitePool) -> Arc<dyn VectorStore> {
    match config.store.backend {
        StoreKind::Memory => Arc::new(InMemoryVectorStore::new()),
        StoreKind::Sqlite => Arc::new(SqliteVectorStore::new(pool.clone())),
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert(
        &self,
        collection: &CollectionKey,
        dims: usize,
        points: Vec<VectorPoint>,
    ) -> GatewayResult<UpsertOutcome> {
        let mut tx = self.pool.begin().await.map_err(GatewayError::storage)?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vector_collections WHERE name = ?")
                .bind(collection.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(GatewayError::storage)?;
        let expected = existing.map_or(dims, |d| d as usize);
        check_dims(collection, expected, &points)?;

        if existing.is_none() {
            sqlx::query("INSERT INTO vector_collections (name, dims, created_at) VALUES (?, ?, ?)")
                .bind(collection.as_str())
                .bind(expected as i64)
                .bind(now_ts())
                .execute(&mut *tx)
                .await
                .map_err(GatewayError::storage)?;
            tracing::info!(collection = %collection, dims = expected, "collection created");
        }

        let updated_at = now_ts();
        let mut outcome = UpsertOutcome::default();
        for point in &points {
            let payload_json = serde_json::to_string(&point.payload).map_err(GatewayError::storage)?;
            sqlx::query(
                r#"
                INSERT INTO vector_points (collection, id, vector, payload_json, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    vector = excluded.vector,
                    payload_json = excluded.payload_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(collection.as_str())
            .bind(&point.id)
            .bind(vec_to_blob(&point.vector))
            .bind(&payload_json)
            .bind(updated_at)
            .execute(&mut *tx)
            .await
            .map_err(GatewayError::storage)?;

            sqlx::query("DELETE FROM vector_point_access WHERE collection = ? AND point_id = ?")
                .bind(collection.as_str())
                .bind(&point.id)
                .execute(&mut *tx)
                .await
                .map_err(GatewayError::storage)?;

            let subjects = point
                .payload
                .allowed_users
                .iter()
                .map(|u| ("user", u))
                .chain(point.payload.allowed_roles.iter().map(|r| ("role", r)));
            for (kind, subject) in subjects {
                sqlx::query(
                    "INSERT OR IGNORE INTO vector_point_access (collection, point_id, subject_kind, subject_id) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(collection.as_str())
                .bind(&point.id)
                .bind(kind)
                .bind(subject)
                .execute(&mut *tx)
                .await
                .map_err(GatewayError::storage)?;
            }
            outcome.succeeded_ids.push(point.id.clone());
        }

        tx.commit().await.map_err(GatewayError::storage)?;
        Ok(outcome)
    }

    async fn search(
        &self,
        collection: &CollectionKey,
        vector: &[f32],
        filter: &AccessFilter,
        k: usize,
    ) -> GatewayResult<Vec<ScoredPoint>> {
        let Some(dims) = self.collection_dims(collection).await? else {
            return Ok(Vec::new());
        };
        if vector.len() != dims {
            return Err(GatewayError::DimensionMismatch {
                collection: collection.to_string(),
                expected: dims,
                actual: vector.len(),
            });
        }

        let roles = serde_json::to_string(&filter.roles).map_err(GatewayError::storage)?;
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.vector, p.payload_json
            FROM vector_points p
            WHERE p.collection = ?
              AND EXISTS (
                SELECT 1 FROM vector_point_access a
                WHERE a.collection = p.collection AND a.point_id = p.id
                  AND ((a.subject_kind = 'user' AND a.subject_id = ?)
                    OR (a.subject_kind = 'role'
                        AND a.subject_id IN (SELECT value FROM json_each(?))))
              )
            "#,
        )
        .bind(collection.as_str())
        .bind(&filter.user_id)
        .bind(&roles)
        .fetch_all(&self.pool)
        .await
        .map_err(GatewayError::storage)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("vector");
            let payload: Chunk = serde_json::from_str(row.get("payload_json"))
                .map_err(GatewayError::storage)?;
            hits.push(ScoredPoint {
                id: row.get("id"),
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                payload,
            });
        }
        rank_points(&mut hits, k);
        Ok(hits)
    }

    async fn collection_dims(&self, collection: &CollectionKey) -> GatewayResult<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM vector_collections WHERE name = ?")
            .bind(collection.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(GatewayError::storage)?;
        Ok(dims.map(|d| d as usize))
    }

    async fn delete_collection(&self, collection: &CollectionKey) -> GatewayResult<bool> {
        let res = sqlx::query("DELETE FROM vector_collections WHERE name = ?")
            .bind(collection.as_str())
            .execute(&self.pool)
            .await
            .map_err(GatewayError::storage)?;
        Ok(res.rows_affected() > 0)
    }
}

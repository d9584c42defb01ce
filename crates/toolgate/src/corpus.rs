//! Corpus registry.
//!
//! A corpus is created once with `(embedding_model_id, chunk_size,
//! chunk_overlap)` and those parameters never change. Its ACL is stored as
//! ordinary corpus grants in the `grants` table, so the same rows that let
//! users query a corpus also stamp `allowed_users` / `allowed_roles` onto
//! every chunk ingested into it.
//!
//! [`CorpusRegistry::get_or_create`] is the write gate: it runs before any
//! embedding work, and a parameter conflict aborts the write with nothing
//! persisted.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use toolgate_core::collection::{validate_corpus_id, CollectionKey};
use toolgate_core::error::{GatewayError, GatewayResult};
use toolgate_core::models::{Acl, Corpus, CorpusParams, SubjectKind};
use toolgate_core::store::VectorStore;

use crate::access_store::now_ts;

/// Result of [`CorpusRegistry::get_or_create`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusEntry {
    pub corpus: Corpus,
    pub acl: Acl,
    pub created: bool,
}

#[derive(Clone)]
pub struct CorpusRegistry {
    pool: SqlitePool,
    known_models: Arc<BTreeSet<String>>,
    default_roles: Arc<Vec<String>>,
}

fn row_to_corpus(row: &SqliteRow) -> Corpus {
    Corpus {
        id: row.get("id"),
        embedding_model_id: row.get("embedding_model_id"),
        chunk_size: row.get::<i64, _>("chunk_size") as usize,
        chunk_overlap: row.get::<i64, _>("chunk_overlap") as usize,
        created_at: row.get("created_at"),
        enabled: row.get::<i64, _>("enabled") != 0,
    }
}

const CORPUS_COLUMNS: &str =
    "id, embedding_model_id, chunk_size, chunk_overlap, enabled, created_at";

pub async fn list_corpora(pool: &SqlitePool) -> GatewayResult<Vec<Corpus>> {
    let rows = sqlx::query(&format!("SELECT {} FROM corpora ORDER BY id", CORPUS_COLUMNS))
        .fetch_all(pool)
        .await
        .map_err(GatewayError::storage)?;
    Ok(rows.iter().map(row_to_corpus).collect())
}

impl CorpusRegistry {
    pub fn new(
        pool: SqlitePool,
        known_models: impl IntoIterator<Item = String>,
        default_roles: Vec<String>,
    ) -> Self {
        Self {
            pool,
            known_models: Arc::new(known_models.into_iter().collect()),
            default_roles: Arc::new(default_roles),
        }
    }

    pub async fn list(&self) -> GatewayResult<Vec<Corpus>> {
        list_corpora(&self.pool).await
    }

    pub async fn get(&self, corpus_id: &str) -> GatewayResult<Option<Corpus>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM corpora WHERE id = ?",
            CORPUS_COLUMNS
        ))
        .bind(corpus_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(GatewayError::storage)?;
        Ok(row.as_ref().map(row_to_corpus))
    }

    /// Users and roles holding a grant on the corpus.
    pub async fn acl(&self, corpus_id: &str) -> GatewayResult<Acl> {
        let rows = sqlx::query(
            "SELECT subject_kind, subject_id FROM grants \
             WHERE resource_kind = 'corpus' AND resource_id = ?",
        )
        .bind(corpus_id)
        .fetch_all(&self.pool)
        .await
        .map_err(GatewayError::storage)?;

        let mut acl = Acl::default();
        for row in &rows {
            let subject: String = row.get("subject_id");
            match row.get::<String, _>("subject_kind").parse::<SubjectKind>()? {
                SubjectKind::User => acl.users.insert(subject),
                SubjectKind::Role => acl.roles.insert(subject),
            };
        }
        Ok(acl)
    }

    /// Return the corpus if its parameters match, create it if absent.
    ///
    /// On an existing corpus the given `acl` is ignored: reuse never widens
    /// or narrows access.
    pub async fn get_or_create(
        &self,
        corpus_id: &str,
        params: &CorpusParams,
        acl: &Acl,
    ) -> GatewayResult<CorpusEntry> {
        validate_corpus_id(corpus_id)?;
        params.validate()?;
        if !self.known_models.contains(&params.embedding_model_id) {
            return Err(GatewayError::UnknownModel(params.embedding_model_id.clone()));
        }

        let mut tx = self.pool.begin().await.map_err(GatewayError::storage)?;
        let created_at = now_ts();
        let inserted = sqlx::query(
            r#"
            INSERT INTO corpora (id, embedding_model_id, chunk_size, chunk_overlap, enabled, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(corpus_id)
        .bind(&params.embedding_model_id)
        .bind(params.chunk_size as i64)
        .bind(params.chunk_overlap as i64)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(GatewayError::storage)?
        .rows_affected()
            == 1;

        if !inserted {
            let row = sqlx::query(&format!(
                "SELECT {} FROM corpora WHERE id = ?",
                CORPUS_COLUMNS
            ))
            .bind(corpus_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(GatewayError::storage)?;
            drop(tx);

            let existing = row_to_corpus(&row);
            let mismatches = existing.params().mismatches(params);
            if !mismatches.is_empty() {
                tracing::warn!(corpus = corpus_id, ?mismatches, "corpus parameter conflict");
                return Err(GatewayError::CorpusConflict {
                    corpus_id: corpus_id.to_string(),
                    mismatches,
                });
            }
            let acl = self.acl(corpus_id).await?;
            return Ok(CorpusEntry {
                corpus: existing,
                acl,
                created: false,
            });
        }

        let mut stored_acl = acl.clone();
        stored_acl
            .roles
            .extend(self.default_roles.iter().cloned());
        for (kind, subjects) in [
            (SubjectKind::User, &stored_acl.users),
            (SubjectKind::Role, &stored_acl.roles),
        ] {
            for subject in subjects {
                sqlx::query(
                    "INSERT OR IGNORE INTO grants (subject_kind, subject_id, resource_kind, resource_id) \
                     VALUES (?, ?, 'corpus', ?)",
                )
                .bind(kind.as_str())
                .bind(subject)
                .bind(corpus_id)
                .execute(&mut *tx)
                .await
                .map_err(GatewayError::storage)?;
            }
        }
        tx.commit().await.map_err(GatewayError::storage)?;

        tracing::info!(
            corpus = corpus_id,
            model = %params.embedding_model_id,
            chunk_size = params.chunk_size,
            chunk_overlap = params.chunk_overlap,
            "corpus created"
        );

        Ok(CorpusEntry {
            corpus: Corpus {
                id: corpus_id.to_string(),
                embedding_model_id: params.embedding_model_id.clone(),
                chunk_size: params.chunk_size,
                chunk_overlap: params.chunk_overlap,
                created_at,
                enabled: true,
            },
            acl: stored_acl,
            created: true,
        })
    }

    /// Remove the corpus, its grants, and its vector collection.
    pub async fn delete(&self, corpus_id: &str, store: &dyn VectorStore) -> GatewayResult<bool> {
        let Some(corpus) = self.get(corpus_id).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await.map_err(GatewayError::storage)?;
        sqlx::query("DELETE FROM grants WHERE resource_kind = 'corpus' AND resource_id = ?")
            .bind(corpus_id)
            .execute(&mut *tx)
            .await
            .map_err(GatewayError::storage)?;
        sqlx::query("DELETE FROM corpora WHERE id = ?")
            .bind(corpus_id)
            .execute(&mut *tx)
            .await
            .map_err(GatewayError::storage)?;
        tx.commit().await.map_err(GatewayError::storage)?;

        let key = CollectionKey::new(&corpus.id, &corpus.embedding_model_id);
        store.delete_collection(&key).await?;
        tracing::info!(corpus = corpus_id, collection = %key, "corpus deleted");
        Ok(true)
    }
}

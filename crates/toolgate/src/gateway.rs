//! Process-wide wiring.
//!
//! [`Gateway::open`] turns a [`Config`] into the shared services every
//! surface (CLI, HTTP, MCP) uses:
//!
//! ```text
//! Config ──▶ SQLite pool ──▶ migrations
//!        ├─▶ EmbeddingCatalog ──┐
//!        ├─▶ VectorStore ───────┼──▶ RetrievalEngine
//!        ├─▶ CorpusRegistry ────┘
//!        ├─▶ AccessStore + AccessPolicy
//!        └─▶ ToolRegistry (per-session connections)
//! ```

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use toolgate_core::access::{AccessPolicy, ResolvedAccess};
use toolgate_core::error::{GatewayError, GatewayResult};
use toolgate_core::models::Identity;

use crate::access_store::{now_ts, AccessStore};
use crate::backends::ToolContext;
use crate::config::Config;
use crate::corpus::CorpusRegistry;
use crate::db;
use crate::embedding::EmbeddingCatalog;
use crate::migrate::run_migrations;
use crate::registry::{RegistryOptions, ToolRegistry};
use crate::retrieval::{QueryOutcome, RetrievalEngine, RetrievalOptions};
use crate::session::ChatSession;
use crate::sqlite_store::open_store;

/// A multi-corpus query on behalf of one identity.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub corpus_ids: Vec<String>,
    pub query_text: String,
    /// Defaults to the model of the first requested corpus.
    #[serde(default)]
    pub embedding_model_id: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Clone)]
pub struct Gateway {
    config: Arc<Config>,
    pool: SqlitePool,
    access: AccessStore,
    policy: AccessPolicy,
    engine: RetrievalEngine,
    registry: ToolRegistry,
}

impl Gateway {
    pub async fn open(config: Config) -> Result<Self> {
        let catalog = EmbeddingCatalog::from_config(&config.embedding)?;
        Self::open_with_catalog(config, catalog).await
    }

    /// Like [`open`](Self::open) with a caller-supplied model catalogue.
    pub async fn open_with_catalog(config: Config, catalog: EmbeddingCatalog) -> Result<Self> {
        let pool = db::connect(&config).await?;
        run_migrations(&pool).await?;

        let store = open_store(&config, &pool);
        let corpora = CorpusRegistry::new(
            pool.clone(),
            catalog.ids(),
            config.access.default_corpus_roles.clone(),
        );
        let engine = RetrievalEngine::new(
            store,
            catalog,
            corpora,
            RetrievalOptions::from_config(&config.retrieval),
        );
        let role = config.access.superadmin_role.trim();
        let policy = AccessPolicy {
            superadmin_role: (!role.is_empty()).then(|| role.to_string()),
        };

        tracing::info!(
            db = %config.db.path.display(),
            store = engine.store().name(),
            "gateway ready"
        );
        Ok(Self {
            registry: ToolRegistry::new(RegistryOptions::from_config(&config.backends)),
            access: AccessStore::new(pool.clone()),
            config: Arc::new(config),
            pool,
            policy,
            engine,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn access_store(&self) -> &AccessStore {
        &self.access
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub fn corpora(&self) -> &CorpusRegistry {
        self.engine.corpora()
    }

    pub async fn resolve(&self, identity: &Identity) -> GatewayResult<ResolvedAccess> {
        self.access
            .resolve(identity, &self.policy)
            .await
            .map_err(|e| GatewayError::Storage(format!("{:#}", e)))
    }

    /// Resolve access and connect every granted backend.
    pub async fn open_session(&self, identity: Identity) -> GatewayResult<ChatSession> {
        let access = self.resolve(&identity).await?;
        let ctx = ToolContext::new(identity.clone(), access.clone()).with_retrieval(self.engine.clone());
        let registry = self.registry.build(&access.tool_backends, &ctx).await;
        let session = ChatSession {
            id: Uuid::new_v4(),
            identity,
            access,
            registry,
            created_at: now_ts(),
        };
        tracing::info!(
            session = %session.id,
            user = %session.identity.user_id,
            backends = session.access.tool_backends.len(),
            corpora = session.access.corpora.len(),
            "session opened"
        );
        Ok(session)
    }

    /// Query corpora the identity can access.
    pub async fn query(&self, identity: &Identity, request: &QueryRequest) -> GatewayResult<QueryOutcome> {
        let access = self.resolve(identity).await?;
        self.query_with_access(identity, &access, request).await
    }

    pub async fn query_with_access(
        &self,
        identity: &Identity,
        access: &ResolvedAccess,
        request: &QueryRequest,
    ) -> GatewayResult<QueryOutcome> {
        let first = request
            .corpus_ids
            .first()
            .ok_or_else(|| GatewayError::invalid("corpus_ids", "must not be empty"))?;
        access.check_searchable(identity, &request.corpus_ids)?;

        let model = match &request.embedding_model_id {
            Some(model) => model.clone(),
            None => access
                .granted_corpus(first)
                .map(|c| c.embedding_model_id.clone())
                .ok_or_else(|| GatewayError::UnknownCorpus(first.clone()))?,
        };
        let k = request.k.unwrap_or(self.engine.options().default_k);
        self.engine
            .query(&request.corpus_ids, &request.query_text, &model, k, identity)
            .await
    }
}

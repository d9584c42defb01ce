//! Relational access-grant store.
//!
//! Backs [`toolgate_core::access::resolve`] with SQLite. The core only ever
//! reads from here; writes come from administrative flows (`toolgate access
//! load`, tests).
//!
//! Two read paths exist:
//!
//! - [`AccessStore::snapshot`] loads the full relation for the pure resolver.
//! - [`AccessStore::effective_resources`] is the SQL contract: one
//!   deduplicated row `{resource_id, resource_kind, enabled}` per resource
//!   reachable through a direct or role grant, via the `effective_grants` view.
//!
//! Backends are validated at registration, so a malformed transport never
//! reaches a session.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use toolgate_core::access::{resolve, AccessPolicy, AccessSnapshot, ResolvedAccess};
use toolgate_core::models::{
    Grant, Identity, ResourceKind, SubjectKind, ToolBackendDescriptor, Transport,
};

#[derive(Clone)]
pub struct AccessStore {
    pool: SqlitePool,
}

/// A row of the access-resolution query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveResource {
    pub resource_id: String,
    pub resource_kind: ResourceKind,
    pub enabled: bool,
}

/// Registration file consumed by `toolgate access load`.
///
/// ```toml
/// [[backends]]
/// id = "jira"
/// transport = "in_process"
/// factory = "jira"
///
/// [[grants]]
/// subject_kind = "user"
/// subject_id = "u1"
/// resource_kind = "tool_backend"
/// resource_id = "jira"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessManifest {
    #[serde(default)]
    pub backends: Vec<ToolBackendDescriptor>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl AccessManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read access manifest: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse access manifest")
    }
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

impl AccessStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub async fn backends(&self) -> Result<Vec<ToolBackendDescriptor>> {
        let rows = sqlx::query("SELECT id, transport_json, enabled FROM tool_backends ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<ToolBackendDescriptor> {
                let id: String = row.get("id");
                let transport: Transport = serde_json::from_str(row.get("transport_json"))
                    .with_context(|| format!("backend '{}' has unreadable transport", id))?;
                Ok(ToolBackendDescriptor {
                    id,
                    transport,
                    enabled: row.get::<i64, _>("enabled") != 0,
                })
            })
            .collect()
    }

    pub async fn grants(&self) -> Result<Vec<Grant>> {
        let rows = sqlx::query(
            "SELECT subject_kind, subject_id, resource_kind, resource_id FROM grants \
             ORDER BY resource_kind, resource_id, subject_kind, subject_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<Grant> {
                Ok(Grant {
                    subject_kind: row.get::<String, _>("subject_kind").parse::<SubjectKind>()?,
                    subject_id: row.get("subject_id"),
                    resource_kind: row.get::<String, _>("resource_kind").parse::<ResourceKind>()?,
                    resource_id: row.get("resource_id"),
                })
            })
            .collect()
    }

    pub async fn snapshot(&self) -> Result<AccessSnapshot> {
        let corpora = crate::corpus::list_corpora(&self.pool).await?;
        Ok(AccessSnapshot {
            backends: self.backends().await?,
            corpora,
            grants: self.grants().await?,
        })
    }

    pub async fn resolve(&self, identity: &Identity, policy: &AccessPolicy) -> Result<ResolvedAccess> {
        let snapshot = self.snapshot().await?;
        Ok(resolve(&snapshot, identity, policy))
    }

    /// Union of role-derived and user-direct grants, deduplicated.
    pub async fn effective_resources(&self, identity: &Identity) -> Result<Vec<EffectiveResource>> {
        let roles = serde_json::to_string(&identity.roles)?;
        let rows = sqlx::query(
            r#"
            SELECT resource_id, resource_kind, enabled FROM effective_grants
            WHERE subject_kind = 'user' AND subject_id = ?
            UNION
            SELECT resource_id, resource_kind, enabled FROM effective_grants
            WHERE subject_kind = 'role' AND subject_id IN (SELECT value FROM json_each(?))
            ORDER BY resource_kind, resource_id
            "#,
        )
        .bind(&identity.user_id)
        .bind(&roles)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<EffectiveResource> {
                Ok(EffectiveResource {
                    resource_id: row.get("resource_id"),
                    resource_kind: row.get::<String, _>("resource_kind").parse()?,
                    enabled: row.get::<i64, _>("enabled") != 0,
                })
            })
            .collect()
    }

    // ── Administrative writes ────────────────────────────────────────────

    /// Insert or replace a backend after validating its transport.
    pub async fn register_backend(&self, descriptor: &ToolBackendDescriptor) -> Result<()> {
        descriptor.validate()?;
        if let Transport::InProcess { factory } = &descriptor.transport {
            if !crate::backends::local::is_known_factory(factory) {
                bail!(
                    "backend '{}': unknown in-process factory '{}' (known: {})",
                    descriptor.id,
                    factory,
                    crate::backends::local::FACTORIES.join(", ")
                );
            }
        }
        let transport_json = serde_json::to_string(&descriptor.transport)?;
        sqlx::query(
            r#"
            INSERT INTO tool_backends (id, kind, transport_json, enabled, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                transport_json = excluded.transport_json,
                enabled = excluded.enabled
            "#,
        )
        .bind(&descriptor.id)
        .bind(descriptor.kind().as_str())
        .bind(&transport_json)
        .bind(descriptor.enabled as i64)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        tracing::info!(backend = %descriptor.id, kind = %descriptor.kind(), "backend registered");
        Ok(())
    }

    pub async fn set_backend_enabled(&self, backend_id: &str, enabled: bool) -> Result<bool> {
        let res = sqlx::query("UPDATE tool_backends SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(backend_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn set_corpus_enabled(&self, corpus_id: &str, enabled: bool) -> Result<bool> {
        let res = sqlx::query("UPDATE corpora SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(corpus_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn grant(&self, grant: &Grant) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO grants (subject_kind, subject_id, resource_kind, resource_id) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(grant.subject_kind.as_str())
        .bind(&grant.subject_id)
        .bind(grant.resource_kind.as_str())
        .bind(&grant.resource_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke(&self, grant: &Grant) -> Result<bool> {
        let res = sqlx::query(
            "DELETE FROM grants WHERE subject_kind = ? AND subject_id = ? \
             AND resource_kind = ? AND resource_id = ?",
        )
        .bind(grant.subject_kind.as_str())
        .bind(&grant.subject_id)
        .bind(grant.resource_kind.as_str())
        .bind(&grant.resource_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Register every backend, then every grant. Stops at the first invalid backend.
    pub async fn apply_manifest(&self, manifest: &AccessManifest) -> Result<()> {
        for backend in &manifest.backends {
            self.register_backend(backend)
                .await
                .with_context(|| format!("backend '{}'", backend.id))?;
        }
        for grant in &manifest.grants {
            self.grant(grant).await?;
        }
        Ok(())
    }
}

//! Schema migrations.
//!
//! All statements are `CREATE ... IF NOT EXISTS`, so running them on every
//! start is safe.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `tool_backends` | Registered backends: id, kind, transport JSON, enabled |
//! | `corpora` | Corpus records with their fixed parameters |
//! | `grants` | user/role → tool_backend/corpus relation |
//! | `effective_grants` (view) | Grants joined with resource enabled state |
//! | `vector_collections` | Declared dimension per collection key |
//! | `vector_points` | Vector BLOB + chunk payload JSON per point |
//! | `vector_point_access` | Exploded `allowed_users` / `allowed_roles` for filtering |

use anyhow::Result;
use sqlx::SqlitePool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tool_backends (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        transport_json TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS corpora (
        id TEXT PRIMARY KEY,
        embedding_model_id TEXT NOT NULL,
        chunk_size INTEGER NOT NULL,
        chunk_overlap INTEGER NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS grants (
        subject_kind TEXT NOT NULL CHECK (subject_kind IN ('user', 'role')),
        subject_id TEXT NOT NULL,
        resource_kind TEXT NOT NULL CHECK (resource_kind IN ('tool_backend', 'corpus')),
        resource_id TEXT NOT NULL,
        PRIMARY KEY (subject_kind, subject_id, resource_kind, resource_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_grants_resource ON grants(resource_kind, resource_id)",
    r#"
    CREATE VIEW IF NOT EXISTS effective_grants AS
        SELECT g.subject_kind, g.subject_id, g.resource_kind, g.resource_id, b.enabled
        FROM grants g JOIN tool_backends b ON g.resource_id = b.id
        WHERE g.resource_kind = 'tool_backend'
        UNION
        SELECT g.subject_kind, g.subject_id, g.resource_kind, g.resource_id, c.enabled
        FROM grants g JOIN corpora c ON g.resource_id = c.id
        WHERE g.resource_kind = 'corpus'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vector_collections (
        name TEXT PRIMARY KEY,
        dims INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vector_points (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        vector BLOB NOT NULL,
        payload_json TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (collection, id),
        FOREIGN KEY (collection) REFERENCES vector_collections(name) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vector_point_access (
        collection TEXT NOT NULL,
        point_id TEXT NOT NULL,
        subject_kind TEXT NOT NULL CHECK (subject_kind IN ('user', 'role')),
        subject_id TEXT NOT NULL,
        PRIMARY KEY (collection, point_id, subject_kind, subject_id),
        FOREIGN KEY (collection, point_id) REFERENCES vector_points(collection, id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_point_access_subject ON vector_point_access(collection, subject_kind, subject_id)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = STATEMENTS.len(), "schema migrations applied");
    Ok(())
}

//! Chat sessions and the arena that owns them.
//!
//! A session pins one identity, its resolved access, and the live backend
//! connections built for it. Sessions are created and removed explicitly;
//! removal shuts the connections down.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use toolgate_core::access::ResolvedAccess;
use toolgate_core::models::Identity;

use crate::registry::{BackendFailure, RegistryHandle};

pub struct ChatSession {
    pub id: Uuid,
    pub identity: Identity,
    pub access: ResolvedAccess,
    pub registry: RegistryHandle,
    pub created_at: i64,
}

/// JSON view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub identity: Identity,
    pub tool_backends: Vec<String>,
    pub corpora: Vec<String>,
    pub connected: Vec<String>,
    pub failures: Vec<BackendFailure>,
    pub tool_count: usize,
    pub created_at: i64,
}

impl ChatSession {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            identity: self.identity.clone(),
            tool_backends: self.access.backend_ids().iter().map(|s| s.to_string()).collect(),
            corpora: self.access.corpus_ids().iter().map(|s| s.to_string()).collect(),
            connected: self.registry.backend_ids().iter().map(|s| s.to_string()).collect(),
            failures: self.registry.failures().to_vec(),
            tool_count: self.registry.list_tools().len(),
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
pub struct SessionArena {
    sessions: RwLock<HashMap<Uuid, Arc<ChatSession>>>,
}

impl SessionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: ChatSession) -> Arc<ChatSession> {
        let session = Arc::new(session);
        self.sessions
            .write()
            .await
            .insert(session.id, Arc::clone(&session));
        session
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<ChatSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session and close its backends.
    pub async fn close(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                session.registry.shutdown().await;
                tracing::info!(session = %id, user = %session.identity.user_id, "session closed");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every session; used on server shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in drained {
            session.registry.shutdown().await;
        }
    }
}

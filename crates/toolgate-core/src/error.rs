//! Typed failure taxonomy shared by every gateway component.
//!
//! Per-item failures (a chunk that could not be embedded) are collected
//! into outcome structs and never surface here. Everything in
//! [`GatewayError`] aborts exactly one operation: a registry build, a
//! tool call, an ingest, or a query. None of them tear down the session.

use crate::models::ResourceKind;

/// Structural failure of a single gateway operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("access denied: user '{user_id}' has no grant for {resource_kind} '{resource_id}'")]
    AccessDenied {
        user_id: String,
        resource_kind: ResourceKind,
        resource_id: String,
    },

    #[error("backend '{backend_id}' unavailable: {reason}")]
    BackendUnavailable { backend_id: String, reason: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error(
        "corpus '{corpus_id}' already exists with different parameters ({})",
        .mismatches.join(", ")
    )]
    CorpusConflict {
        corpus_id: String,
        mismatches: Vec<String>,
    },

    #[error("collection '{collection}' holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("unknown corpus: {0}")]
    UnknownCorpus(String),

    #[error("unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    pub fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        GatewayError::Invalid {
            what,
            reason: reason.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        GatewayError::Storage(err.to_string())
    }

    /// Machine-readable code used in HTTP and MCP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AccessDenied { .. } => "access_denied",
            GatewayError::BackendUnavailable { .. } => "backend_unavailable",
            GatewayError::UnknownTool(_) => "not_found",
            GatewayError::ToolFailed { .. } => "tool_error",
            GatewayError::CorpusConflict { .. } => "conflict",
            GatewayError::DimensionMismatch { .. } => "dimension_mismatch",
            GatewayError::EmbeddingFailure(_) => "embedding_failure",
            GatewayError::UnknownCorpus(_) => "not_found",
            GatewayError::UnknownModel(_) => "bad_request",
            GatewayError::Invalid { .. } => "bad_request",
            GatewayError::Storage(_) => "internal",
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_lists_fields() {
        let err = GatewayError::CorpusConflict {
            corpus_id: "demo".into(),
            mismatches: vec!["chunk_size: 1200 != 500".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("demo"));
        assert!(msg.contains("chunk_size: 1200 != 500"));
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn test_access_denied_names_resource() {
        let err = GatewayError::AccessDenied {
            user_id: "u2".into(),
            resource_kind: ResourceKind::Corpus,
            resource_id: "hr_docs".into(),
        };
        assert_eq!(
            err.to_string(),
            "access denied: user 'u2' has no grant for corpus 'hr_docs'"
        );
    }
}

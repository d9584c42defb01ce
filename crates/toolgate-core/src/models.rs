//! Core data models for Toolgate.
//!
//! These types flow between the access resolver, the tool registry, and
//! the retrieval pipeline. All of them are plain data; persistence lives
//! in the application crate.
//!
//! # Type Overview
//!
//! | Type | Role |
//! |------|------|
//! | [`Identity`] | Authenticated caller: user id plus role set |
//! | [`ToolBackendDescriptor`] | Registered MCP backend and its transport |
//! | [`Grant`] | User-or-role → backend-or-corpus access relation |
//! | [`Corpus`] | Logical document collection with fixed parameters |
//! | [`Acl`] | Users and roles allowed to read a corpus's chunks |
//! | [`Chunk`] | Stored payload of one vector point |
//! | [`SearchResult`] | One ranked hit, produced per query |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

// ═══════════════════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════════════════

/// An authenticated caller. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Identity {
    pub fn new<I, S>(user_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool backends
// ═══════════════════════════════════════════════════════════════════════

/// Closed set of backend kinds, derived from the transport variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    RemoteStdio,
    RemoteHttp,
    LocalInproc,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::RemoteStdio => "remote_stdio",
            BackendKind::RemoteHttp => "remote_http",
            BackendKind::LocalInproc => "local_inproc",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the gateway reaches a backend.
///
/// Serialized with an internal `transport` tag so registration manifests
/// read naturally:
///
/// ```toml
/// [[backends]]
/// id = "jira"
/// transport = "http"
/// url = "https://mcp.example.com/jira"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Transport {
    /// Child process speaking newline-delimited JSON-RPC over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Remote endpoint speaking JSON-RPC over HTTP POST.
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// Built-in backend created by a named factory inside this process.
    InProcess { factory: String },
}

impl Transport {
    pub fn kind(&self) -> BackendKind {
        match self {
            Transport::Stdio { .. } => BackendKind::RemoteStdio,
            Transport::Http { .. } => BackendKind::RemoteHttp,
            Transport::InProcess { .. } => BackendKind::LocalInproc,
        }
    }

    /// Reject configs that could never connect, before they reach a session.
    pub fn validate(&self) -> GatewayResult<()> {
        match self {
            Transport::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(GatewayError::invalid(
                        "transport",
                        "stdio transport requires a command",
                    ));
                }
            }
            Transport::Http { url, headers } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(GatewayError::invalid(
                        "transport",
                        format!("http transport url must be http(s): '{}'", url),
                    ));
                }
                if let Some(name) = headers.keys().find(|k| k.trim().is_empty()) {
                    return Err(GatewayError::invalid(
                        "transport",
                        format!("empty header name '{}'", name),
                    ));
                }
            }
            Transport::InProcess { factory } => {
                if factory.trim().is_empty() {
                    return Err(GatewayError::invalid(
                        "transport",
                        "in-process transport requires a factory name",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

/// A registered tool backend. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBackendDescriptor {
    pub id: String,
    #[serde(flatten)]
    pub transport: Transport,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ToolBackendDescriptor {
    pub fn kind(&self) -> BackendKind {
        self.transport.kind()
    }

    /// Backend ids become the namespace prefix of every tool name, so they
    /// may not contain the `.` separator.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.id.is_empty()
            || !self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(GatewayError::invalid(
                "backend id",
                format!("'{}' must be non-empty [A-Za-z0-9_-]", self.id),
            ));
        }
        self.transport.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Grants
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ToolBackend,
    Corpus,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Role => "role",
        }
    }
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ToolBackend => "tool_backend",
            ResourceKind::Corpus => "corpus",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SubjectKind::User),
            "role" => Ok(SubjectKind::Role),
            other => Err(GatewayError::invalid(
                "subject kind",
                format!("'{}' (expected user or role)", other),
            )),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool_backend" => Ok(ResourceKind::ToolBackend),
            "corpus" => Ok(ResourceKind::Corpus),
            other => Err(GatewayError::invalid(
                "resource kind",
                format!("'{}' (expected tool_backend or corpus)", other),
            )),
        }
    }
}

/// Access relation from a user or role to a backend or corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub subject_kind: SubjectKind,
    pub subject_id: String,
    pub resource_kind: ResourceKind,
    pub resource_id: String,
}

impl Grant {
    pub fn user(user_id: &str, resource_kind: ResourceKind, resource_id: &str) -> Self {
        Self {
            subject_kind: SubjectKind::User,
            subject_id: user_id.to_string(),
            resource_kind,
            resource_id: resource_id.to_string(),
        }
    }

    pub fn role(role: &str, resource_kind: ResourceKind, resource_id: &str) -> Self {
        Self {
            subject_kind: SubjectKind::Role,
            subject_id: role.to_string(),
            resource_kind,
            resource_id: resource_id.to_string(),
        }
    }

    /// Whether this grant reaches `identity`, directly or through a role.
    pub fn applies_to(&self, identity: &Identity) -> bool {
        match self.subject_kind {
            SubjectKind::User => self.subject_id == identity.user_id,
            SubjectKind::Role => identity.has_role(&self.subject_id),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Corpora and chunks
// ═══════════════════════════════════════════════════════════════════════

/// Parameters fixed at corpus creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusParams {
    pub embedding_model_id: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl CorpusParams {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.chunk_size == 0 {
            return Err(GatewayError::invalid("chunk_size", "must be > 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(GatewayError::invalid(
                "chunk_overlap",
                format!(
                    "{} must be smaller than chunk_size {}",
                    self.chunk_overlap, self.chunk_size
                ),
            ));
        }
        Ok(())
    }

    /// Human-readable list of fields where `self` differs from `other`.
    pub fn mismatches(&self, other: &CorpusParams) -> Vec<String> {
        let mut out = Vec::new();
        if self.embedding_model_id != other.embedding_model_id {
            out.push(format!(
                "embedding_model_id: {} != {}",
                self.embedding_model_id, other.embedding_model_id
            ));
        }
        if self.chunk_size != other.chunk_size {
            out.push(format!(
                "chunk_size: {} != {}",
                self.chunk_size, other.chunk_size
            ));
        }
        if self.chunk_overlap != other.chunk_overlap {
            out.push(format!(
                "chunk_overlap: {} != {}",
                self.chunk_overlap, other.chunk_overlap
            ));
        }
        out
    }
}

/// A named document collection bound to one embedding model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corpus {
    pub id: String,
    pub embedding_model_id: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    pub enabled: bool,
}

impl Corpus {
    pub fn params(&self) -> CorpusParams {
        CorpusParams {
            embedding_model_id: self.embedding_model_id.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

/// Users and roles allowed to read a corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    #[serde(default)]
    pub users: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Acl {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.roles.is_empty()
    }
}

/// Stored payload of one vector point.
///
/// Serializes to the persisted payload shape: `id, text, source,
/// source_type, chunk_index, allowed_users, allowed_roles, uploaded_by,
/// corpus_id, embedding_model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub source_type: String,
    pub chunk_index: i64,
    #[serde(default)]
    pub allowed_users: BTreeSet<String>,
    #[serde(default)]
    pub allowed_roles: BTreeSet<String>,
    #[serde(default)]
    pub uploaded_by: String,
    pub corpus_id: String,
    #[serde(rename = "embedding_model")]
    pub embedding_model_id: String,
}

/// One ranked hit. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
    pub corpus_id: String,
}

//! # Toolgate
//!
//! **Access-resolved MCP tool aggregation and multi-corpus retrieval.**
//!
//! Toolgate sits between a chat client and its tools. For every session it
//! resolves what the caller may use, connects only those tool backends, and
//! answers retrieval queries only from corpora the caller can read.
//!
//! ## Architecture
//!
//! ```text
//!   Identity ──▶ AccessStore ──▶ ResolvedAccess ─┬─▶ ToolRegistry ──▶ RegistryHandle
//!                 (SQLite)                       │      stdio / http / in-process
//!                                                │
//!                                                └─▶ RetrievalEngine ──▶ VectorStore
//!                                                      CorpusRegistry      memory / sqlite
//!                                                      EmbeddingCatalog
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`access_store`] | Backends, grants, and the access-resolution query |
//! | [`corpus`] | Corpus registry with immutable parameters |
//! | [`embedding`] | Embedding model catalogue (stub, OpenAI, Ollama) |
//! | [`sqlite_store`] | SQLite vector store with in-SQL access filtering |
//! | [`retrieval`] | Ingest and multi-corpus query |
//! | [`backends`] | Stdio, HTTP, and in-process backend connections |
//! | [`registry`] | Per-session tool aggregation and call routing |
//! | [`session`] | Chat sessions and the session arena |
//! | [`gateway`] | Process-wide wiring |
//! | [`server`] | HTTP API (Axum) |
//! | [`mcp`] | MCP stdio bridge (rmcp) |

pub mod access_store;
pub mod backends;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod gateway;
pub mod mcp;
pub mod migrate;
pub mod registry;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod sqlite_store;

pub use gateway::{Gateway, QueryRequest};
pub use registry::{RegistryHandle, ToolRegistry};
pub use retrieval::{QueryOutcome, RetrievalEngine};
pub use toolgate_core::store;

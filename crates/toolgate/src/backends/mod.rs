//! Live connections to tool backends.
//!
//! | Transport | Module | Connection |
//! |-----------|--------|------------|
//! | `stdio` | [`stdio`] | Child process, newline-delimited JSON-RPC over its pipes |
//! | `http` | [`http`] | JSON-RPC POSTs, JSON or SSE responses |
//! | `in_process` | [`local`] | Rust tools compiled into the gateway |
//!
//! Every connection exposes the same [`BackendConnection`] surface; the
//! registry never looks at the transport after [`connect`] returns.

pub mod http;
pub mod local;
pub mod protocol;
pub mod stdio;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use toolgate_core::error::GatewayResult;
use toolgate_core::models::{ToolBackendDescriptor, Transport};

pub use local::ToolContext;

/// A tool as advertised by a backend (unprefixed) or the registry (prefixed).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

#[async_trait]
pub trait BackendConnection: Send + Sync {
    fn backend_id(&self) -> &str;

    /// Tools advertised at connect time.
    fn tools(&self) -> &[ToolSpec];

    /// Forward one call. `name` is the backend-local tool name.
    async fn call_tool(&self, name: &str, args: Value) -> GatewayResult<Value>;

    fn is_alive(&self) -> bool;

    async fn close(&self);
}

/// Open a connection and fetch its tool list.
pub async fn connect(
    descriptor: &ToolBackendDescriptor,
    ctx: &ToolContext,
    call_timeout: Duration,
) -> GatewayResult<Box<dyn BackendConnection>> {
    descriptor.validate()?;
    Ok(match &descriptor.transport {
        Transport::Stdio { command, args, env } => Box::new(
            stdio::StdioConnection::spawn(&descriptor.id, command, args, env, call_timeout).await?,
        ),
        Transport::Http { url, headers } => Box::new(
            http::HttpConnection::connect(&descriptor.id, url, headers, call_timeout).await?,
        ),
        Transport::InProcess { factory } => {
            Box::new(local::LocalBackend::from_factory(&descriptor.id, factory, ctx.clone())?)
        }
    })
}

fn spec_from_listed(tool: protocol::ListedTool) -> ToolSpec {
    ToolSpec {
        name: tool.name,
        description: tool.description.unwrap_or_default(),
        schema: tool
            .input_schema
            .unwrap_or_else(|| serde_json::json!({"type": "object"})),
    }
}

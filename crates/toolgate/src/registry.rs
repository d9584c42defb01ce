//! Per-session tool aggregation.
//!
//! [`ToolRegistry::build`] connects to every resolved backend concurrently,
//! each under the connect timeout. A backend that fails or hangs is
//! recorded in [`RegistryHandle::failures`] and its tools are left out; the
//! rest of the session works normally.
//!
//! Tool names are namespaced as `<backend_id>.<tool_name>`. Backend ids
//! cannot contain `.`, so [`RegistryHandle::call`] splits at the first dot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use toolgate_core::error::{GatewayError, GatewayResult};
use toolgate_core::models::ToolBackendDescriptor;

use crate::backends::{self, BackendConnection, ToolContext, ToolSpec};
use crate::config::BackendsConfig;

pub const NAME_SEPARATOR: char = '.';

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
}

impl RegistryOptions {
    pub fn from_config(config: &BackendsConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from_config(&BackendsConfig::default())
    }
}

/// A backend that could not be connected for this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    pub backend_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    options: RegistryOptions,
}

impl ToolRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self { options }
    }

    /// Connect to `backends` and collect their tools.
    pub async fn build(&self, backends: &[ToolBackendDescriptor], ctx: &ToolContext) -> RegistryHandle {
        let handles: Vec<_> = backends
            .iter()
            .map(|descriptor| {
                let descriptor = descriptor.clone();
                let ctx = ctx.clone();
                let options = self.options.clone();
                let id = descriptor.id.clone();
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(
                        options.connect_timeout,
                        backends::connect(&descriptor, &ctx, options.call_timeout),
                    )
                    .await
                    {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(_) => Err(format!(
                            "no connection within {}s",
                            options.connect_timeout.as_secs_f32()
                        )),
                    }
                });
                (id, handle)
            })
            .collect();

        let mut connections: BTreeMap<String, Arc<dyn BackendConnection>> = BTreeMap::new();
        let mut failures = Vec::new();
        for (backend_id, handle) in handles {
            let reason = match handle.await {
                Ok(Ok(conn)) => {
                    connections.insert(backend_id, Arc::from(conn));
                    continue;
                }
                Ok(Err(reason)) => reason,
                Err(e) => format!("connect task failed: {}", e),
            };
            tracing::warn!(backend = %backend_id, %reason, "backend unavailable for session");
            failures.push(BackendFailure { backend_id, reason });
        }

        tracing::info!(
            user = %ctx.identity().user_id,
            connected = connections.len(),
            failed = failures.len(),
            "tool registry built"
        );
        RegistryHandle {
            connections,
            failures,
        }
    }
}

/// The live connections of one session.
pub struct RegistryHandle {
    connections: BTreeMap<String, Arc<dyn BackendConnection>>,
    failures: Vec<BackendFailure>,
}

impl RegistryHandle {
    /// Every tool of every live backend, prefixed, ordered by backend id.
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.is_alive())
            .flat_map(|(backend_id, conn)| {
                conn.tools().iter().map(move |tool| ToolSpec {
                    name: format!("{}{}{}", backend_id, NAME_SEPARATOR, tool.name),
                    description: tool.description.clone(),
                    schema: tool.schema.clone(),
                })
            })
            .collect()
    }

    pub fn failures(&self) -> &[BackendFailure] {
        &self.failures
    }

    pub fn backend_ids(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }

    /// Forward a namespaced call and return the backend's result verbatim.
    pub async fn call(&self, name: &str, args: Value) -> GatewayResult<Value> {
        let (backend_id, tool) = name
            .split_once(NAME_SEPARATOR)
            .filter(|(b, t)| !b.is_empty() && !t.is_empty())
            .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;

        let Some(conn) = self.connections.get(backend_id) else {
            return Err(match self.failures.iter().find(|f| f.backend_id == backend_id) {
                Some(failure) => GatewayError::BackendUnavailable {
                    backend_id: backend_id.to_string(),
                    reason: failure.reason.clone(),
                },
                None => GatewayError::UnknownTool(name.to_string()),
            });
        };
        if !conn.is_alive() {
            return Err(GatewayError::BackendUnavailable {
                backend_id: backend_id.to_string(),
                reason: "connection closed".to_string(),
            });
        }
        if !conn.tools().iter().any(|t| t.name == tool) {
            return Err(GatewayError::UnknownTool(name.to_string()));
        }

        tracing::debug!(backend = backend_id, tool, "forwarding tool call");
        conn.call_tool(tool, args).await
    }

    /// Close every connection. Later calls fail with `BackendUnavailable`.
    pub async fn shutdown(&self) {
        for (backend_id, conn) in &self.connections {
            conn.close().await;
            tracing::debug!(backend = %backend_id, "backend closed");
        }
    }
}

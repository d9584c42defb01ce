//! HTTP MCP backends.
//!
//! Each JSON-RPC message is one POST to the backend URL. The server may
//! answer with `application/json` or a short `text/event-stream`; for the
//! latter the `data:` line carrying the matching response id is used. A
//! `Mcp-Session-Id` returned by `initialize` is echoed on every later
//! request.
//!
//! Requests are independent, so a failed call does not kill the
//! connection; it returns `BackendUnavailable` and the next call tries
//! again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use toolgate_core::error::{GatewayError, GatewayResult};

use super::protocol::{self, methods, RpcRequest, RpcResponse};
use super::{spec_from_listed, BackendConnection, ToolSpec};

const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpConnection {
    backend_id: String,
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    session_id: RwLock<Option<String>>,
    tools: Vec<ToolSpec>,
    alive: AtomicBool,
    next_id: AtomicU64,
}

fn header_map(backend_id: &str, headers: &BTreeMap<String, String>) -> GatewayResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GatewayError::invalid("transport", format!("{}: header '{}': {}", backend_id, name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| GatewayError::invalid("transport", format!("{}: header value: {}", backend_id, e)))?;
        map.insert(name, value);
    }
    map.insert(ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
    Ok(map)
}

/// Pick the response for `id` out of an SSE body.
fn parse_sse(body: &str, id: u64) -> Option<RpcResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<RpcResponse>(data.trim()).ok())
        .find(|r| r.answers(id))
}

impl HttpConnection {
    pub async fn connect(
        backend_id: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        call_timeout: Duration,
    ) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| GatewayError::BackendUnavailable {
                backend_id: backend_id.to_string(),
                reason: e.to_string(),
            })?;

        let mut conn = Self {
            backend_id: backend_id.to_string(),
            url: url.to_string(),
            client,
            headers: header_map(backend_id, headers)?,
            session_id: RwLock::new(None),
            tools: Vec::new(),
            alive: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        };

        conn.request(methods::INITIALIZE, protocol::initialize_params())
            .await?
            .into_result()
            .map_err(|e| conn.unavailable(format!("initialize rejected: {}", e.message)))?;
        conn.notify(methods::INITIALIZED).await;

        let listed = conn
            .request(methods::TOOLS_LIST, serde_json::json!({}))
            .await?
            .into_result()
            .map_err(|e| conn.unavailable(format!("tools/list rejected: {}", e.message)))?;
        conn.tools = protocol::parse_tools(listed)
            .map_err(|e| conn.unavailable(format!("malformed tools/list result: {}", e)))?
            .into_iter()
            .map(spec_from_listed)
            .collect();

        tracing::info!(backend = backend_id, url, tools = conn.tools.len(), "http backend connected");
        Ok(conn)
    }

    fn unavailable(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::BackendUnavailable {
            backend_id: self.backend_id.clone(),
            reason: reason.into(),
        }
    }

    fn post(&self, message: &RpcRequest) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(message);
        let session = self.session_id.read().ok().and_then(|s| s.clone());
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }

    /// Notifications are fire-and-forget; servers answer 202 with no body.
    async fn notify(&self, method: &str) {
        if let Err(e) = self.post(&RpcRequest::notification(method)).send().await {
            tracing::debug!(backend = %self.backend_id, error = %e, "notification not delivered");
        }
    }

    async fn request(&self, method: &str, params: Value) -> GatewayResult<RpcResponse> {
        if !self.is_alive() {
            return Err(self.unavailable("connection closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self
            .post(&RpcRequest::call(id, method, params))
            .send()
            .await
            .map_err(|e| self.unavailable(format!("{} failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("{} returned {}: {}", method, status, body)));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.write() {
                *slot = Some(session.to_string());
            }
        }

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| self.unavailable(format!("reading {} response: {}", method, e)))?;

        let parsed = if is_sse {
            parse_sse(&body, id)
        } else {
            serde_json::from_str::<RpcResponse>(&body).ok()
        };
        parsed.ok_or_else(|| self.unavailable(format!("malformed {} response", method)))
    }
}

#[async_trait]
impl BackendConnection for HttpConnection {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    async fn call_tool(&self, name: &str, args: Value) -> GatewayResult<Value> {
        let params = serde_json::json!({ "name": name, "arguments": args });
        self.request(methods::TOOLS_CALL, params)
            .await?
            .into_result()
            .map_err(|e| GatewayError::ToolFailed {
                tool: format!("{}.{}", self.backend_id, name),
                message: e.message,
            })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

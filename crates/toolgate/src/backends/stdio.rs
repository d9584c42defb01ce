//! Stdio MCP backends.
//!
//! The backend runs as a child process; requests are newline-delimited
//! JSON-RPC on its stdin and responses are read from its stdout. Its stderr
//! is forwarded to `tracing` at debug level.
//!
//! One request is in flight at a time: the pipes sit behind a tokio
//! `Mutex` that is held from write to matching response. A timeout, EOF, or
//! broken pipe drops the child and marks the connection dead; every later
//! call fails fast with `BackendUnavailable`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use toolgate_core::error::{GatewayError, GatewayResult};

use super::protocol::{self, methods, RpcRequest, RpcResponse};
use super::{spec_from_listed, BackendConnection, ToolSpec};

struct Pipes {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct StdioConnection {
    backend_id: String,
    tools: Vec<ToolSpec>,
    pipes: Mutex<Option<Pipes>>,
    alive: AtomicBool,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl StdioConnection {
    /// Spawn the process, run the MCP handshake, and list its tools.
    pub async fn spawn(
        backend_id: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        call_timeout: Duration,
    ) -> GatewayResult<Self> {
        let unavailable = |reason: String| GatewayError::BackendUnavailable {
            backend_id: backend_id.to_string(),
            reason,
        };

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| unavailable("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| unavailable("stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let backend = backend_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(backend = %backend, "{}", line);
                }
            });
        }

        let mut conn = Self {
            backend_id: backend_id.to_string(),
            tools: Vec::new(),
            pipes: Mutex::new(Some(Pipes {
                child,
                stdin,
                stdout: BufReader::new(stdout),
            })),
            alive: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            call_timeout,
        };

        conn.request(methods::INITIALIZE, protocol::initialize_params())
            .await?
            .into_result()
            .map_err(|e| unavailable(format!("initialize rejected: {}", e.message)))?;
        conn.notify(methods::INITIALIZED).await?;

        let listed = conn
            .request(methods::TOOLS_LIST, serde_json::json!({}))
            .await?
            .into_result()
            .map_err(|e| unavailable(format!("tools/list rejected: {}", e.message)))?;
        conn.tools = protocol::parse_tools(listed)
            .map_err(|e| unavailable(format!("malformed tools/list result: {}", e)))?
            .into_iter()
            .map(spec_from_listed)
            .collect();

        tracing::info!(backend = backend_id, tools = conn.tools.len(), "stdio backend connected");
        Ok(conn)
    }

    fn unavailable(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::BackendUnavailable {
            backend_id: self.backend_id.clone(),
            reason: reason.into(),
        }
    }

    async fn notify(&self, method: &str) -> GatewayResult<()> {
        let line = encode(&RpcRequest::notification(method)).map_err(|e| self.unavailable(e))?;
        let mut guard = self.pipes.lock().await;
        let Some(pipes) = guard.as_mut() else {
            return Err(self.unavailable("connection closed"));
        };
        if let Err(e) = write_line(&mut pipes.stdin, &line).await {
            *guard = None;
            self.alive.store(false, Ordering::SeqCst);
            return Err(self.unavailable(e));
        }
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> GatewayResult<RpcResponse> {
        if !self.is_alive() {
            return Err(self.unavailable("connection closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = encode(&RpcRequest::call(id, method, params)).map_err(|e| self.unavailable(e))?;

        let mut guard = self.pipes.lock().await;
        let Some(pipes) = guard.as_mut() else {
            return Err(self.unavailable("connection closed"));
        };

        let exchange = async {
            write_line(&mut pipes.stdin, &line).await?;
            read_response(&mut pipes.stdout, id, &self.backend_id).await
        };
        let failure = match tokio::time::timeout(self.call_timeout, exchange).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(reason)) => reason,
            Err(_) => format!("no response to {} within {:?}", method, self.call_timeout),
        };

        // Response stream is no longer in sync; drop (and kill) the child.
        *guard = None;
        self.alive.store(false, Ordering::SeqCst);
        tracing::warn!(backend = %self.backend_id, reason = %failure, "stdio backend lost");
        Err(self.unavailable(failure))
    }
}

fn encode(request: &RpcRequest) -> Result<String, String> {
    serde_json::to_string(request).map_err(|e| e.to_string())
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<(), String> {
    stdin
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .map_err(|e| format!("write failed: {}", e))?;
    stdin
        .flush()
        .await
        .map_err(|e| format!("flush failed: {}", e))
}

/// Read lines until the response for `id`. Notifications, server requests,
/// and non-JSON log lines are skipped.
async fn read_response(
    stdout: &mut BufReader<ChildStdout>,
    id: u64,
    backend_id: &str,
) -> Result<RpcResponse, String> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| format!("read failed: {}", e))?;
        if n == 0 {
            return Err("process closed stdout".to_string());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<RpcResponse>(trimmed) {
            Ok(response) if response.answers(id) => return Ok(response),
            Ok(_) => continue,
            Err(_) => tracing::debug!(backend = backend_id, line = trimmed, "non-protocol stdout line"),
        }
    }
}

#[async_trait]
impl BackendConnection for StdioConnection {
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
        if let Some(mut pipes) = self.pipes.lock().await.take() {
            if let Err(e) = pipes.child.kill().await {
                tracing::debug!(backend = %self.backend_id, error = %e, "kill failed");
            }
        }
    }
}

//! MCP bridge.
//!
//! Serves one session's aggregated catalogue as an MCP server over stdio,
//! so an MCP client sees `<backend>.<tool>` entries for exactly the
//! backends the session identity was granted.
//!
//! Tool failures come back as `CallToolResult` errors so the model can read
//! them; an unknown tool name is a protocol error (`METHOD_NOT_FOUND`).

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};

use toolgate_core::error::GatewayError;

use crate::backends::ToolSpec;
use crate::session::ChatSession;

#[derive(Clone)]
pub struct McpBridge {
    session: Arc<ChatSession>,
}

impl McpBridge {
    pub fn new(session: Arc<ChatSession>) -> Self {
        Self { session }
    }

    fn to_mcp_tool(spec: &ToolSpec) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match &spec.schema {
            serde_json::Value::Object(map) => Arc::new(map.clone()),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Owned(spec.name.clone()),
            title: None,
            description: Some(Cow::Owned(spec.description.clone())),
            input_schema,
            output_schema: None,
            annotations: None,
            execution: None,
            icons: None,
            meta: None,
        }
    }

    /// Backends return MCP-shaped results; anything else is wrapped as text.
    fn to_call_result(value: serde_json::Value) -> CallToolResult {
        match serde_json::from_value::<CallToolResult>(value.clone()) {
            Ok(result) => result,
            Err(_) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_default();
                CallToolResult::success(vec![Content::text(text)])
            }
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "toolgate".to_string(),
                title: Some("Toolgate".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Tools from {} backend(s) granted to user '{}'. Names are <backend>.<tool>.",
                self.session.registry.backend_ids().len(),
                self.session.identity.user_id
            )),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .session
            .registry
            .list_tools()
            .iter()
            .map(Self::to_mcp_tool)
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.session
            .registry
            .list_tools()
            .iter()
            .find(|t| t.name == name)
            .map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match self.session.registry.call(&request.name, args).await {
            Ok(value) => Ok(Self::to_call_result(value)),
            Err(GatewayError::UnknownTool(name)) => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", name),
                None,
            )),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

/// Serve `session` on stdin/stdout until the client disconnects.
pub async fn serve_stdio(session: Arc<ChatSession>) -> anyhow::Result<()> {
    tracing::info!(
        session = %session.id,
        user = %session.identity.user_id,
        tools = session.registry.list_tools().len(),
        "serving MCP over stdio"
    );
    let service = McpBridge::new(Arc::clone(&session))
        .serve(rmcp::transport::stdio())
        .await?;
    service.waiting().await?;
    session.registry.shutdown().await;
    Ok(())
}

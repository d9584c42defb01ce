//! In-process tool backends.
//!
//! Local backends are plain Rust [`Tool`]s grouped under a factory name.
//! A session builds them with its own [`ToolContext`], so a tool always acts
//! as the session's identity and never trusts a `user_id` argument.
//!
//! | Factory | Tools |
//! |---------|-------|
//! | `document_retrieval` | `upsert`, `search` |
//! | `hr` | `get_policy` |
//! | `jira` | `search_issues` |

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use toolgate_core::access::ResolvedAccess;
use toolgate_core::error::{GatewayError, GatewayResult};
use toolgate_core::models::Identity;

use super::{BackendConnection, ToolSpec};
use crate::retrieval::{IngestRequest, RetrievalEngine};

/// Factory names accepted by `transport = "in_process"`.
pub const FACTORIES: &[&str] = &["document_retrieval", "hr", "jira"];

pub fn is_known_factory(name: &str) -> bool {
    FACTORIES.contains(&name)
}

/// What a local tool knows about the session it runs in.
#[derive(Clone)]
pub struct ToolContext {
    identity: Identity,
    access: ResolvedAccess,
    retrieval: Option<RetrievalEngine>,
}

impl ToolContext {
    pub fn new(identity: Identity, access: ResolvedAccess) -> Self {
        Self {
            identity,
            access,
            retrieval: None,
        }
    }

    pub fn with_retrieval(mut self, engine: RetrievalEngine) -> Self {
        self.retrieval = Some(engine);
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn access(&self) -> &ResolvedAccess {
        &self.access
    }

    fn retrieval(&self) -> GatewayResult<&RetrievalEngine> {
        self.retrieval.as_ref().ok_or_else(|| GatewayError::BackendUnavailable {
            backend_id: "document_retrieval".to_string(),
            reason: "no retrieval engine in this session".to_string(),
        })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> GatewayResult<Value>;
}

pub struct LocalBackend {
    backend_id: String,
    ctx: ToolContext,
    tools: Vec<Box<dyn Tool>>,
    specs: Vec<ToolSpec>,
    alive: AtomicBool,
}

impl LocalBackend {
    pub fn new(backend_id: &str, tools: Vec<Box<dyn Tool>>, ctx: ToolContext) -> Self {
        let specs = tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                schema: t.parameters_schema(),
            })
            .collect();
        Self {
            backend_id: backend_id.to_string(),
            ctx,
            tools,
            specs,
            alive: AtomicBool::new(true),
        }
    }

    pub fn from_factory(backend_id: &str, factory: &str, ctx: ToolContext) -> GatewayResult<Self> {
        let tools: Vec<Box<dyn Tool>> = match factory {
            "document_retrieval" => {
                ctx.retrieval()?;
                vec![Box::new(UpsertTool), Box::new(SearchTool)]
            }
            "hr" => vec![Box::new(HrPolicyTool)],
            "jira" => vec![Box::new(JiraSearchTool)],
            other => {
                return Err(GatewayError::invalid(
                    "transport",
                    format!("unknown in-process factory '{}'", other),
                ))
            }
        };
        Ok(Self::new(backend_id, tools, ctx))
    }
}

/// Wrap a tool's JSON output in the MCP `tools/call` result shape.
pub fn tool_result(value: Value) -> Value {
    let text = serde_json::to_string_pretty(&value).unwrap_or_default();
    serde_json::json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": value,
        "isError": false,
    })
}

#[async_trait]
impl BackendConnection for LocalBackend {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn tools(&self) -> &[ToolSpec] {
        &self.specs
    }

    async fn call_tool(&self, name: &str, args: Value) -> GatewayResult<Value> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| GatewayError::UnknownTool(format!("{}.{}", self.backend_id, name)))?;
        let params = if args.is_null() {
            serde_json::json!({})
        } else {
            args
        };
        Ok(tool_result(tool.execute(params, &self.ctx).await?))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

fn required_str<'a>(params: &'a Value, field: &'static str) -> GatewayResult<&'a str> {
    match params[field].as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(GatewayError::invalid(field, "must be a non-empty string")),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// document_retrieval
// ═══════════════════════════════════════════════════════════════════════

/// Index documents into a corpus the session can access.
pub struct UpsertTool;

#[async_trait]
impl Tool for UpsertTool {
    fn name(&self) -> &str {
        "upsert"
    }

    fn description(&self) -> &str {
        "Index or upsert documents into a semantic corpus. Each document is chunked \
         with the corpus's fixed parameters and embedded with its model."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "corpus_id": { "type": "string" },
                "embedding_model_id": {
                    "type": "string",
                    "description": "Must match the corpus's model. Defaults to it."
                },
                "documents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "source": { "type": "string" },
                            "source_type": { "type": "string" },
                            "text": { "type": "string" }
                        },
                        "required": ["text"]
                    }
                }
            },
            "required": ["corpus_id", "documents"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> GatewayResult<Value> {
        let engine = ctx.retrieval()?;
        let corpus_id = required_str(&params, "corpus_id")?;
        ctx.access().check_corpora(ctx.identity(), &[corpus_id])?;
        let corpus = ctx
            .access()
            .corpus(corpus_id)
            .ok_or_else(|| GatewayError::UnknownCorpus(corpus_id.to_string()))?;
        let model = params["embedding_model_id"]
            .as_str()
            .unwrap_or(&corpus.embedding_model_id)
            .to_string();

        let documents = params["documents"]
            .as_array()
            .ok_or_else(|| GatewayError::invalid("documents", "must be an array"))?;

        let mut chunks = 0;
        let mut succeeded_ids = Vec::new();
        let mut failed_ids = Vec::new();
        for doc in documents {
            let text = required_str(doc, "text")?;
            let source = doc["source"]
                .as_str()
                .or_else(|| doc["id"].as_str())
                .ok_or_else(|| GatewayError::invalid("documents", "each document needs a source or id"))?;
            let report = engine
                .ingest_document(IngestRequest {
                    corpus_id: corpus_id.to_string(),
                    embedding_model_id: model.clone(),
                    chunk_size: Some(corpus.chunk_size),
                    chunk_overlap: Some(corpus.chunk_overlap),
                    source: source.to_string(),
                    source_type: doc["source_type"].as_str().unwrap_or_default().to_string(),
                    text: text.to_string(),
                    uploaded_by: ctx.identity().user_id.clone(),
                    acl: Default::default(),
                })
                .await?;
            chunks += report.chunks;
            succeeded_ids.extend(report.outcome.succeeded_ids);
            failed_ids.extend(report.outcome.failed_ids);
        }

        Ok(serde_json::json!({
            "corpus_id": corpus_id,
            "embedding_model_id": model,
            "documents": documents.len(),
            "chunks": chunks,
            "succeeded_ids": succeeded_ids,
            "failed_ids": failed_ids,
        }))
    }
}

/// Semantic search across the session's corpora.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Semantic search over one or more corpora. Returns ranked chunks and a \
         context block ready to quote."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "corpus_ids": { "type": "array", "items": { "type": "string" } },
                "embedding_model_id": {
                    "type": "string",
                    "description": "Defaults to the first corpus's model"
                },
                "query_text": { "type": "string" },
                "k": { "type": "integer", "minimum": 1 }
            },
            "required": ["corpus_ids", "query_text"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> GatewayResult<Value> {
        let engine = ctx.retrieval()?;
        let query = required_str(&params, "query_text")?;
        let corpus_ids: Vec<String> = params["corpus_ids"]
            .as_array()
            .ok_or_else(|| GatewayError::invalid("corpus_ids", "must be an array of strings"))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if corpus_ids.is_empty() {
            return Err(GatewayError::invalid("corpus_ids", "must not be empty"));
        }
        ctx.access().check_searchable(ctx.identity(), &corpus_ids)?;

        let model = match params["embedding_model_id"].as_str() {
            Some(m) => m.to_string(),
            None => ctx
                .access()
                .granted_corpus(&corpus_ids[0])
                .map(|c| c.embedding_model_id.clone())
                .ok_or_else(|| GatewayError::UnknownCorpus(corpus_ids[0].clone()))?,
        };
        let k = params["k"]
            .as_u64()
            .map(|k| k as usize)
            .unwrap_or(engine.options().default_k);

        let outcome = engine
            .query(&corpus_ids, query, &model, k, ctx.identity())
            .await?;
        let context = engine.build_context(&outcome.results);
        let mut json = serde_json::to_value(&outcome).map_err(GatewayError::storage)?;
        json["context"] = Value::String(context);
        Ok(json)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Demo catalogues
// ═══════════════════════════════════════════════════════════════════════

pub struct HrPolicyTool;

#[async_trait]
impl Tool for HrPolicyTool {
    fn name(&self) -> &str {
        "get_policy"
    }

    fn description(&self) -> &str {
        "Get the HR vacation policy for a country code. Use this whenever the user \
         asks about vacation policy for any country. Do not guess."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "country": { "type": "string", "description": "ISO country code, e.g. 'DE'." }
            },
            "required": ["country"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> GatewayResult<Value> {
        let country = params["country"].as_str().unwrap_or("UNKNOWN");
        Ok(serde_json::json!({
            "country": country,
            "policy": format!("Stubbed vacation policy for {}.", country),
        }))
    }
}

pub struct JiraSearchTool;

#[async_trait]
impl Tool for JiraSearchTool {
    fn name(&self) -> &str {
        "search_issues"
    }

    fn description(&self) -> &str {
        "Search Jira issues by text query (stubbed)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query string." }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> GatewayResult<Value> {
        let query = params["query"].as_str().unwrap_or_default();
        Ok(serde_json::json!({
            "query": query,
            "issues": [
                { "key": "PROJ-1", "summary": "Stubbed issue 1" },
                { "key": "PROJ-2", "summary": "Stubbed issue 2" }
            ]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new(Identity::new("u1", ["Admin"]), ResolvedAccess::default())
    }

    #[tokio::test]
    async fn test_hr_backend_lists_and_calls() {
        let backend = LocalBackend::from_factory("hr", "hr", ctx()).unwrap();
        assert_eq!(backend.tools()[0].name, "get_policy");
        let out = backend
            .call_tool("get_policy", serde_json::json!({"country": "DE"}))
            .await
            .unwrap();
        assert_eq!(out["structuredContent"]["country"], "DE");
        assert_eq!(out["isError"], false);
    }

    #[tokio::test]
    async fn test_unknown_local_tool() {
        let backend = LocalBackend::from_factory("jira", "jira", ctx()).unwrap();
        let err = backend.call_tool("create", Value::Null).await.unwrap_err();
        assert_eq!(err, GatewayError::UnknownTool("jira.create".into()));
    }

    #[test]
    fn test_unknown_factory_and_missing_engine() {
        assert!(matches!(
            LocalBackend::from_factory("x", "nope", ctx()),
            Err(GatewayError::Invalid { .. })
        ));
        assert!(matches!(
            LocalBackend::from_factory("docs", "document_retrieval", ctx()),
            Err(GatewayError::BackendUnavailable { .. })
        ));
        assert!(is_known_factory("hr"));
        assert!(!is_known_factory("lua"));
    }
}

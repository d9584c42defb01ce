//! HTTP surface for sessions, tool calls, and retrieval.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sessions` | Open a session for `{user_id, roles}` |
//! | `GET` | `/sessions/{id}` | Session summary: access, connected backends, failures |
//! | `GET` | `/sessions/{id}/tools` | Aggregated, prefixed tool list |
//! | `POST` | `/sessions/{id}/tools/{name}` | Call `<backend>.<tool>` with a JSON body |
//! | `DELETE` | `/sessions/{id}` | Close the session and its backends |
//! | `POST` | `/query` | Multi-corpus retrieval for `{user_id, roles, corpus_ids, query_text, ...}` |
//! | `GET` | `/health` | Version and store backend |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "access_denied", "message": "..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `access_denied` | 403 |
//! | `not_found` | 404 |
//! | `conflict` | 409 |
//! | `dimension_mismatch` | 422 |
//! | `internal`, `tool_error` | 500 |
//! | `backend_unavailable`, `embedding_failure` | 502 |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use toolgate_core::error::GatewayError;
use toolgate_core::models::Identity;

use crate::backends::ToolSpec;
use crate::gateway::{Gateway, QueryRequest};
use crate::retrieval::QueryOutcome;
use crate::session::{ChatSession, SessionArena, SessionSummary};

#[derive(Clone)]
pub struct AppState {
    gateway: Gateway,
    sessions: Arc<SessionArena>,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            sessions: Arc::new(SessionArena::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionArena> {
        &self.sessions
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sessions", post(handle_open_session))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_close_session),
        )
        .route("/sessions/{id}/tools", get(handle_list_tools))
        .route("/sessions/{id}/tools/{name}", post(handle_tool_call))
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C, then close every open session.
pub async fn run_server(gateway: Gateway) -> anyhow::Result<()> {
    let bind_addr = gateway.config().server.bind.clone();
    let state = AppState::new(gateway);
    let sessions = Arc::clone(state.sessions());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "http server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    sessions.close_all().await;
    tracing::info!("http server stopped");
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let status = match &err {
            GatewayError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            GatewayError::UnknownTool(_) | GatewayError::UnknownCorpus(_) => StatusCode::NOT_FOUND,
            GatewayError::CorpusConflict { .. } => StatusCode::CONFLICT,
            GatewayError::DimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::BackendUnavailable { .. } | GatewayError::EmbeddingFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::UnknownModel(_) | GatewayError::Invalid { .. } => StatusCode::BAD_REQUEST,
            GatewayError::ToolFailed { .. } | GatewayError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

async fn session_or_404(state: &AppState, id: &Uuid) -> Result<Arc<ChatSession>, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    store: String,
    sessions: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: state.gateway.engine().store().name().to_string(),
        sessions: state.sessions.len().await,
    })
}

// ============ Sessions ============

async fn handle_open_session(
    State(state): State<AppState>,
    Json(identity): Json<Identity>,
) -> Result<(StatusCode, Json<SessionSummary>), AppError> {
    if identity.user_id.trim().is_empty() {
        return Err(GatewayError::invalid("user_id", "must not be empty").into());
    }
    let session = state.gateway.open_session(identity).await?;
    let session = state.sessions.insert(session).await;
    Ok((StatusCode::CREATED, Json(session.summary())))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    let session = session_or_404(&state, &id).await?;
    Ok(Json(session.summary()))
}

async fn handle_close_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.close(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no session with id: {}", id)))
    }
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolSpec>,
}

async fn handle_list_tools(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ToolListResponse>, AppError> {
    let session = session_or_404(&state, &id).await?;
    Ok(Json(ToolListResponse {
        tools: session.registry.list_tools(),
    }))
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
    Json(args): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = session_or_404(&state, &id).await?;
    let result = session.registry.call(&name, args).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryBody {
    #[serde(flatten)]
    identity: Identity,
    #[serde(flatten)]
    request: QueryRequest,
}

#[derive(Serialize)]
struct QueryResponse {
    #[serde(flatten)]
    outcome: QueryOutcome,
    context: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, AppError> {
    if body.request.query_text.trim().is_empty() {
        return Err(GatewayError::invalid("query_text", "must not be empty").into());
    }
    let outcome = state.gateway.query(&body.identity, &body.request).await?;
    let context = state.gateway.engine().build_context(&outcome.results);
    Ok(Json(QueryResponse { outcome, context }))
}

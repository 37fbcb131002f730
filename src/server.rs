//! JSON RPC surface for the editor UI process.
//!
//! A thin request/response layer over the engine handle. Operations that are
//! user-visible never propagate errors: they answer `{success, message}`, and
//! `search` always returns a context pack (possibly empty). Internal faults
//! surface as a structured 500 body.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/rpc/index_document` | Ingest one document into a scope |
//! | `POST` | `/rpc/search` | Retrieval query → context pack |
//! | `GET`  | `/rpc/stats` | Corpus statistics |
//! | `POST` | `/rpc/delete_document` | Remove a document from both stores |
//! | `POST` | `/rpc/is_document_indexed` | Membership check by path |
//! | `GET`  | `/rpc/documents` | List documents, optionally by scope |
//! | `POST` | `/rpc/clear_all_embeddings` | Purge both stores |
//! | `GET`  | `/health` | Liveness (returns version) |

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::engine::RagEngine;
use crate::models::{ContextPack, Document, Scope, SearchScope};
use crate::stats::StatsReport;

#[derive(Clone)]
struct AppState {
    engine: Arc<RagEngine>,
}

/// Serve the RPC surface on `bind` until the process terminates.
pub async fn run_server(engine: Arc<RagEngine>, bind: &str) -> anyhow::Result<()> {
    let state = AppState { engine };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/rpc/index_document", post(handle_index))
        .route("/rpc/search", post(handle_search))
        .route("/rpc/stats", get(handle_stats))
        .route("/rpc/delete_document", post(handle_delete))
        .route("/rpc/is_document_indexed", post(handle_is_indexed))
        .route("/rpc/documents", get(handle_documents))
        .route("/rpc/clear_all_embeddings", post(handle_clear))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!("rpc server listening on http://{bind}");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Response shapes ============

/// `{success, message}` shape for user-visible mutations.
#[derive(Serialize)]
struct OpResponse {
    success: bool,
    message: String,
}

impl OpResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }

    fn fail(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            message: message.into(),
        })
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ POST /rpc/index_document ============

#[derive(Deserialize)]
struct IndexRequest {
    path: PathBuf,
    scope: String,
}

async fn handle_index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Json<OpResponse> {
    let Some(scope) = Scope::parse(&req.scope) else {
        return OpResponse::fail(format!(
            "unknown scope '{}'; use policy_manual or workspace_docs",
            req.scope
        ));
    };

    match state.engine.index_document(&req.path, scope).await {
        Ok(report) => OpResponse::ok(report.message),
        Err(e) => OpResponse::fail(e.to_string()),
    }
}

// ============ POST /rpc/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_search_scope")]
    scope: String,
    #[serde(default)]
    limit: Option<usize>,
}

fn default_search_scope() -> String {
    "both".to_string()
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<ContextPack>, AppError> {
    let scope = SearchScope::parse(&req.scope).ok_or_else(|| {
        bad_request(format!(
            "unknown scope '{}'; use policy_manual, workspace_docs, or both",
            req.scope
        ))
    })?;

    Ok(Json(state.engine.search(&req.query, scope, req.limit).await))
}

// ============ GET /rpc/stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsReport>, AppError> {
    state
        .engine
        .stats()
        .await
        .map(Json)
        .map_err(|e| internal_error(e.to_string()))
}

// ============ POST /rpc/delete_document ============

#[derive(Deserialize)]
struct DeleteRequest {
    doc_id: String,
}

async fn handle_delete(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Json<OpResponse> {
    match state.engine.delete_document(&req.doc_id).await {
        Ok(true) => OpResponse::ok("Document deleted."),
        Ok(false) => OpResponse::fail(format!("no document with id {}", req.doc_id)),
        Err(e) => OpResponse::fail(e.to_string()),
    }
}

// ============ POST /rpc/is_document_indexed ============

#[derive(Deserialize)]
struct IsIndexedRequest {
    path: PathBuf,
}

#[derive(Serialize)]
struct IsIndexedResponse {
    indexed: bool,
}

async fn handle_is_indexed(
    State(state): State<AppState>,
    Json(req): Json<IsIndexedRequest>,
) -> Result<Json<IsIndexedResponse>, AppError> {
    let indexed = state
        .engine
        .is_document_indexed(&req.path)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(IsIndexedResponse { indexed }))
}

// ============ GET /rpc/documents ============

#[derive(Deserialize)]
struct DocumentsQuery {
    scope: Option<String>,
}

async fn handle_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentsQuery>,
) -> Result<Json<Vec<Document>>, AppError> {
    let scope = match params.scope.as_deref() {
        None => None,
        Some(raw) => Some(
            Scope::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown scope '{raw}'")))?,
        ),
    };

    state
        .engine
        .documents_by_scope(scope)
        .await
        .map(Json)
        .map_err(|e| internal_error(e.to_string()))
}

// ============ POST /rpc/clear_all_embeddings ============

async fn handle_clear(State(state): State<AppState>) -> Json<OpResponse> {
    match state.engine.clear_all().await {
        Ok(()) => OpResponse::ok("All documents and embeddings cleared."),
        Err(e) => OpResponse::fail(e.to_string()),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

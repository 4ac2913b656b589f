//! JSON HTTP API over one shared [`RetrievalEngine`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Document counts per slot, index state |
//! | `POST` | `/ingest` | `{text, metadata?, slot?}` → ingest report |
//! | `POST` | `/context` | `{query, k?, threshold?, slot?}` → `{context, items}` |
//! | `POST` | `/delete` | `{ordinals}` → `{removed}` |
//! | `POST` | `/clear` | `{slot?}` → `{removed}` (everything when no slot) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embedding_failed` (500),
//! `not_durable` (500), `internal` (500).
//!
//! Engine calls are synchronous and may embed over the network or rebuild
//! the index, so every handler runs them on tokio's blocking pool.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use knowledge_harness_core::models::Metadata;
use knowledge_harness_core::retrieve::{format_context, ContextItem};

use crate::config::Config;
use crate::engine::{EngineError, EngineStats, IngestReport, RetrievalEngine, RetrieveOptions};

#[derive(Clone)]
struct AppState {
    engine: Arc<RetrievalEngine>,
}

/// Open the engine described by `config` and serve it on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let cfg = config.clone();
    let engine = tokio::task::spawn_blocking(move || RetrievalEngine::from_config(&cfg)).await??;
    run_server_with_engine(Arc::new(engine), &config.server.bind).await
}

/// Serve an existing engine on `bind_addr` until the process exits.
pub async fn run_server_with_engine(
    engine: Arc<RetrievalEngine>,
    bind_addr: &str,
) -> anyhow::Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "knowledge server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// The application router, with permissive CORS.
pub fn router(engine: Arc<RetrievalEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/ingest", post(handle_ingest))
        .route("/context", post(handle_context))
        .route("/delete", post(handle_delete))
        .route("/clear", post(handle_clear))
        .layer(cors)
        .with_state(AppState { engine })
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

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let (status, code) = if err.is_input_error() {
            (StatusCode::BAD_REQUEST, "bad_request")
        } else {
            match err {
                EngineError::Embedding { .. }
                | EngineError::QueryEmbedding(_)
                | EngineError::Rebuild(_) => (StatusCode::INTERNAL_SERVER_ERROR, "embedding_failed"),
                EngineError::NotDurable { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "not_durable"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

/// Run `f` against the engine on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&RetrievalEngine) -> Result<T, EngineError> + Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(engine.as_ref()))
        .await
        .map_err(|e| AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: e.to_string(),
        })?
        .map_err(AppError::from)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<EngineStats>, AppError> {
    let stats = blocking(&state, |engine| Ok(engine.stats())).await?;
    Ok(Json(stats))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    text: String,
    #[serde(default)]
    metadata: Metadata,
    slot: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let report = blocking(&state, move |engine| {
        engine.ingest(&req.text, req.metadata, req.slot.as_deref())
    })
    .await?;
    Ok(Json(report))
}

// ============ POST /context ============

#[derive(Deserialize)]
struct ContextRequest {
    query: String,
    k: Option<usize>,
    threshold: Option<f32>,
    slot: Option<String>,
}

#[derive(Serialize)]
struct ContextResponse {
    context: String,
    items: Vec<ContextItem>,
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, AppError> {
    let options = RetrieveOptions {
        k: req.k,
        threshold: req.threshold,
        slot: req.slot,
    };
    let items = blocking(&state, move |engine| {
        engine.retrieve_items(&req.query, &options)
    })
    .await?;
    Ok(Json(ContextResponse {
        context: format_context(&items),
        items,
    }))
}

// ============ POST /delete, POST /clear ============

#[derive(Deserialize)]
struct DeleteRequest {
    ordinals: Vec<usize>,
}

#[derive(Deserialize)]
struct ClearRequest {
    slot: Option<String>,
}

#[derive(Serialize)]
struct RemovedResponse {
    removed: usize,
}

async fn handle_delete(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<RemovedResponse>, AppError> {
    let ordinals: BTreeSet<usize> = req.ordinals.into_iter().collect();
    let removed = blocking(&state, move |engine| engine.delete(&ordinals)).await?;
    Ok(Json(RemovedResponse { removed }))
}

async fn handle_clear(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> Result<Json<RemovedResponse>, AppError> {
    let removed = blocking(&state, move |engine| match req.slot.as_deref() {
        Some(slot) => engine.clear_slot(slot),
        None => engine.clear_all(),
    })
    .await?;
    Ok(Json(RemovedResponse { removed }))
}

//! HTTP surface over [`RagPipeline`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/healthz` | Liveness check (returns version) |
//! | `POST` | `/ingest` | Ingest one document for a tenant |
//! | `POST` | `/chat` | Answer a query with citations |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query cannot be empty" } }
//! ```
//!
//! | Code | Status | Raised for |
//! |------|--------|------------|
//! | `bad_request` | 400 | malformed body, empty tenant/query/doc id, bad source URI, `top_k` out of range |
//! | `not_found` | 404 | source document does not exist |
//! | `no_relevant_content` | 404 | nothing in the tenant's corpus matched |
//! | `ungroundable` | 409 | no cited answer after every attempt |
//! | `unextractable` | 422 | source yielded no text |
//! | `upstream_unavailable` | 502 | embedding, index, storage or generation call failed |
//! | `internal` | 500 | server misconfiguration |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::RagError;
use crate::models::{ChatResponse, TenantId};
use crate::pipeline::RagPipeline;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RagPipeline>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(pipeline: Arc<RagPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline })
}

/// Bind to `bind_addr` and serve until the process is terminated.
pub async fn run_server(bind_addr: &str, pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let app = router(pipeline);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
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
                code: self.code,
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

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            RagError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RagError::NoRelevantContent => (StatusCode::NOT_FOUND, "no_relevant_content"),
            RagError::Ungroundable { .. } => (StatusCode::CONFLICT, "ungroundable"),
            RagError::Unextractable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "unextractable"),
            RagError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
        };
        if status.is_server_error() {
            error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ GET /healthz ============

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

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    tenant_id: String,
    /// `gcs_uri` is accepted as an alias.
    #[serde(alias = "gcs_uri")]
    source_uri: String,
    doc_id: String,
}

#[derive(Serialize)]
struct IngestResponse {
    job_id: String,
    doc_id: String,
    chunks: usize,
}

async fn handle_ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let Json(req) = body?;
    let tenant = TenantId::new(&req.tenant_id)?;
    let report = state
        .pipeline
        .ingest(&tenant, &req.source_uri, &req.doc_id)
        .await?;
    Ok(Json(IngestResponse {
        job_id: report.job_id,
        doc_id: report.doc_id,
        chunks: report.chunks,
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    tenant_id: String,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = body?;
    let tenant = TenantId::new(&req.tenant_id)?;
    let response = state.pipeline.ask(&tenant, &req.query, req.top_k).await?;
    Ok(Json(response))
}

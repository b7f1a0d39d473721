//! HTTP API for ingestion, status polling, cancellation and reports.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/jobs` | Submit a document, returns `202 {"job_id"}` immediately |
//! | `GET`  | `/jobs` | Recent job summaries (`?limit=`, default 20) |
//! | `GET`  | `/jobs/{id}` | Current job snapshot; never blocks |
//! | `POST` | `/jobs/{id}/cancel` | Cancel a pending or processing job |
//! | `GET`  | `/jobs/{id}/report` | Export data for a completed job |
//! | `GET`  | `/stats` | Dashboard aggregates |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Uploads are JSON: `{"filename", "content_base64" | "raw_text", "owner"?}`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "document is empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `not_found` (404),
//! `conflict` (409), `internal` (500).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CancelError, IngestError};
use crate::export::ReportDocument;
use crate::jobs::{IngestRequest, JobManager, Payload};
use crate::models::{AnalysisJob, JobSummary};
use crate::stats::{self, DashboardStats};

#[derive(Clone)]
struct AppState {
    jobs: JobManager,
}

/// Serves the API on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config, jobs: JobManager) -> anyhow::Result<()> {
    let app = router(jobs, config.ingest.max_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the application router. The request body limit leaves room for
/// `max_bytes` of base64-encoded content.
pub fn router(jobs: JobManager, max_bytes: usize) -> Router {
    let body_limit = max_bytes.saturating_mul(4) / 3 + 64 * 1024;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/jobs", post(handle_ingest).get(handle_list))
        .route("/jobs/{id}", get(handle_get))
        .route("/jobs/{id}/cancel", post(handle_cancel))
        .route("/jobs/{id}/report", get(handle_report))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(AppState { jobs })
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

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
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
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::CONFLICT, "conflict", message)
}

fn internal(err: anyhow::Error) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", err))
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        bad_request(err.to_string())
    }
}

impl From<CancelError> for AppError {
    fn from(err: CancelError) -> Self {
        match &err {
            CancelError::NotFound(_) => not_found(err.to_string()),
            CancelError::AlreadyFinished { .. } => conflict(err.to_string()),
            CancelError::NotOwner(_) => {
                AppError::new(StatusCode::FORBIDDEN, "forbidden", err.to_string())
            }
        }
    }
}

fn parse_job_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| bad_request(format!("invalid job id: {}", raw)))
}

async fn load_job(state: &AppState, id: Uuid) -> Result<Arc<AnalysisJob>, AppError> {
    state
        .jobs
        .get(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("job not found: {}", id)))
}

// ============ POST /jobs ============

#[derive(Deserialize)]
struct IngestBody {
    filename: String,
    #[serde(default)]
    content_base64: Option<String>,
    #[serde(default)]
    raw_text: Option<String>,
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Serialize)]
struct IngestResponse {
    job_id: Uuid,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    if body.filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty"));
    }

    let payload = match (body.content_base64, body.raw_text) {
        (Some(encoded), None) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| IngestError::Malformed(format!("content_base64: {}", e)))?;
            Payload::Bytes(bytes)
        }
        (None, Some(text)) => Payload::Text(text),
        _ => {
            return Err(bad_request(
                "exactly one of content_base64 or raw_text is required",
            ))
        }
    };

    let job_id = state.jobs.ingest(IngestRequest {
        filename: body.filename,
        payload,
        owner: body.owner,
    })?;

    Ok((StatusCode::ACCEPTED, Json(IngestResponse { job_id })))
}

// ============ GET /jobs ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    20
}

#[derive(Serialize)]
struct ListResponse {
    jobs: Vec<JobSummary>,
}

async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let jobs = state.jobs.list(params.limit).await.map_err(internal)?;
    Ok(Json(ListResponse { jobs }))
}

// ============ GET /jobs/{id} ============

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Arc<AnalysisJob>>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(load_job(&state, id).await?))
}

// ============ POST /jobs/{id}/cancel ============

#[derive(Deserialize, Default)]
struct CancelBody {
    #[serde(default)]
    owner: Option<String>,
}

async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Arc<AnalysisJob>>, AppError> {
    let id = parse_job_id(&id)?;
    let body: CancelBody = if body.is_empty() {
        CancelBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };

    let job = state.jobs.cancel(id, body.owner.as_deref()).await?;
    Ok(Json(job))
}

// ============ GET /jobs/{id}/report ============

async fn handle_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportDocument>, AppError> {
    let id = parse_job_id(&id)?;
    let job = load_job(&state, id).await?;
    let report = ReportDocument::from_job(&job).map_err(|e| conflict(e.to_string()))?;
    Ok(Json(report))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(stats::collect(&state.jobs).await.map_err(internal)?))
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

//! HTTP surface
//!
//! Thin axum layer over [`Pipeline`]: trigger a run, read back its ledger entry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::pipeline::{Pipeline, RunReport, RunStatus};
use crate::sources::batch_from_value;
use crate::storage::{CancelFlag, RunLedgerEntry, SqliteSignalStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Same store the pipeline writes to; read side of the run ledger.
    pub store: Arc<SqliteSignalStore>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/runs", post(trigger_run))
        .route("/runs/primary", post(trigger_primary_run))
        .route("/runs/:run_id", get(get_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        runs_recorded: state.store.run_count().unwrap_or(0),
    })
}

/// POST /runs
/// Body: array of records or `{"games": [...]}`
async fn trigger_run(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let payloads = batch_from_value(body).map_err(ApiError::BadRequest)?;
    let report = state.pipeline.run_batch(payloads, &CancelFlag::new()).await;
    Ok(report_response(report))
}

/// POST /runs/primary
/// Pull the batch from the configured primary source.
async fn trigger_primary_run(State(state): State<AppState>) -> Response {
    let report = state.pipeline.run_from_primary(&CancelFlag::new()).await;
    report_response(report)
}

/// GET /runs/:run_id
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunLedgerEntry>, ApiError> {
    state
        .store
        .get_run(&run_id)?
        .map(Json)
        .ok_or(ApiError::NotFound(format!("Run {} not found", run_id)))
}

pub fn status_code(status: &RunStatus) -> StatusCode {
    match status {
        RunStatus::Published => StatusCode::OK,
        RunStatus::Blocked { .. } => StatusCode::CONFLICT,
        RunStatus::NoData { .. } | RunStatus::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        RunStatus::StorageFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn report_response(report: RunReport) -> Response {
    (status_code(&report.status), Json(report)).into_response()
}

// ===== Response Types =====

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    runs_recorded: usize,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Database(anyhow::Error),
    NotFound(String),
    BadRequest(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Database(err) => {
                tracing::error!("Database error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_engine::{
    BatchStatus, CancelStatus, Continuation, JobType, ProgressSnapshot, StartStatus,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(start_backup))
        .route("/run", post(run_batch))
        .route("/cancel", post(cancel_backup))
        .route("/progress", get(get_progress))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(default = "default_job_type")]
    job_type: JobType,
    /// Generated when absent
    session_id: Option<String>,
}

fn default_job_type() -> JobType {
    JobType::Full
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    session_id: Option<String>,
}

async fn start_backup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartStatus>), AppError> {
    let session_id = body
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let engine = state.engine.clone();
    let session = session_id.clone();
    let status = blocking(move || engine.start_backup(body.job_type, &session)).await?;

    // First batch goes through the queue like every later one
    state.queue.schedule(&session_id);

    let code = match status {
        StartStatus::Accepted { .. } => StatusCode::ACCEPTED,
        StartStatus::Resumed { .. } => StatusCode::OK,
    };
    Ok((code, Json(status)))
}

/// Manual batch trigger; a no-op status when nothing is running.
async fn run_batch(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<BatchStatus>, AppError> {
    let session_id = body.and_then(|Json(body)| body.session_id);
    let engine = state.engine.clone();
    let status = blocking(move || engine.run_batch(session_id.as_deref())).await?;
    Ok(Json(status))
}

async fn cancel_backup(State(state): State<Arc<AppState>>) -> Result<Json<CancelStatus>, AppError> {
    let engine = state.engine.clone();
    let status = blocking(move || engine.cancel_backup()).await?;
    Ok(Json(status))
}

async fn get_progress(State(state): State<Arc<AppState>>) -> Result<Json<ProgressSnapshot>, AppError> {
    let engine = state.engine.clone();
    let snapshot = blocking(move || engine.progress()).await?;
    Ok(Json(snapshot))
}

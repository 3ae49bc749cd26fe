pub mod backup;
pub mod backups;
pub mod settings;

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/backup", backup::router())
        .nest("/api/backups", backups::router())
        .nest("/api/settings", settings::router())
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run a blocking engine call off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> backup_engine::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(result?)
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let engine = state.engine.clone();
    let active = blocking(move || engine.active_job()).await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSession": active.map(|job| job.session_id),
        "mirror": state.config.mirror_dir.is_some(),
    })))
}


#[cfg(test)]
mod tests {
    use super::test_support::{app, send};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = send(&app.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["activeSession"].is_null());
    }
}

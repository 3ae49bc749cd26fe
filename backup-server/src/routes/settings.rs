use super::blocking;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use backup_engine::models::settings::EngineSettings;
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_settings).put(update_settings))
}

#[derive(Debug, Deserialize)]
struct UpdateSettingsRequest {
    retention_count: Option<usize>,
    incremental_enabled: Option<bool>,
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<EngineSettings>, AppError> {
    let engine = state.engine.clone();
    let settings = blocking(move || engine.settings()).await?;
    Ok(Json(settings))
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<EngineSettings>, AppError> {
    let engine = state.engine.clone();
    let settings = blocking(move || {
        engine.update_settings(body.retention_count, body.incremental_enabled)
    })
    .await?;
    Ok(Json(settings))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{app, send};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_keeps_unset_fields() {
        let app = app();
        let (status, body) = send(&app.router, "GET", "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "retention_count": 5, "incremental_enabled": true }));

        let (_, body) = send(
            &app.router,
            "PUT",
            "/api/settings",
            Some(json!({ "retention_count": 2 })),
        )
        .await;
        assert_eq!(body, json!({ "retention_count": 2, "incremental_enabled": true }));

        let (_, body) = send(
            &app.router,
            "PUT",
            "/api/settings",
            Some(json!({ "incremental_enabled": false })),
        )
        .await;
        assert_eq!(body, json!({ "retention_count": 2, "incremental_enabled": false }));
    }
}

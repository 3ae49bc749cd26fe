use super::blocking;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_engine::restore::{ArchiveEntry, RestoreOptions, RestoreReport};
use backup_engine::BackupRecord;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups))
        .route("/{id}", get(get_backup).delete(delete_backup))
        .route("/{id}/entries", get(list_entries))
        .route("/{id}/restore", post(restore_backup))
}

async fn list_backups(State(state): State<Arc<AppState>>) -> Result<Json<Vec<BackupRecord>>, AppError> {
    let engine = state.engine.clone();
    let records = blocking(move || engine.list_backups()).await?;
    Ok(Json(records))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupRecord>, AppError> {
    let engine = state.engine.clone();
    let record = blocking(move || engine.get_backup(&id)).await?;
    Ok(Json(record))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupRecord>, AppError> {
    let engine = state.engine.clone();
    let record = blocking(move || engine.delete_backup(&id)).await?;
    tracing::info!("Deleted backup {} via API", record.id);
    Ok(Json(record))
}

async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ArchiveEntry>>, AppError> {
    let engine = state.engine.clone();
    let entries = blocking(move || engine.list_archive_entries(&id)).await?;
    Ok(Json(entries))
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<RestoreOptions>>,
) -> Result<Json<RestoreReport>, AppError> {
    let options = body.map(|Json(options)| options).unwrap_or_default();
    let engine = state.engine.clone();
    let report = blocking(move || engine.restore_backup(&id, &options)).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{app, send};
    use axum::http::StatusCode;
    use backup_engine::JobType;
    use serde_json::json;

    fn completed_backup(app: &crate::routes::test_support::TestApp) -> String {
        app.engine.start_backup(JobType::Full, "s-1").unwrap();
        loop {
            if let backup_engine::BatchStatus::Completed { backup_id } =
                app.engine.run_batch(Some("s-1")).unwrap()
            {
                return backup_id;
            }
        }
    }

    #[tokio::test]
    async fn test_catalog() {
        let app = app();
        let (status, body) = send(&app.router, "GET", "/api/backups", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let id = completed_backup(&app);
        let (_, body) = send(&app.router, "GET", "/api/backups", None).await;
        assert_eq!(body[0]["id"], id.as_str());
        assert_eq!(body[0]["job_type"], "full");

        let (status, body) = send(&app.router, "GET", &format!("/api/backups/{id}/entries"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["path"], "index.html");

        let (status, _) = send(&app.router, "GET", "/api/backups/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app.router, "DELETE", &format!("/api/backups/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app.router, "GET", &format!("/api/backups/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_restore() {
        let app = app();
        let id = completed_backup(&app);
        let site = app.engine.config().paths.content_root.clone();
        std::fs::write(site.join("index.html"), b"defaced").unwrap();

        let (status, body) = send(
            &app.router,
            "POST",
            &format!("/api/backups/{id}/restore"),
            Some(json!({ "database": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files_restored"], 1);
        assert_eq!(std::fs::read(site.join("index.html")).unwrap(), b"<h1>hi</h1>");

        let (status, _) = send(&app.router, "POST", "/api/backups/nope/restore", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

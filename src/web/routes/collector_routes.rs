use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;

use crate::db::models::CollectorOverview;
use crate::db::services::collector_service;
use crate::web::error::AppError;
use crate::web::models::AuthenticatedUser;
use crate::web::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_collectors))
        .route("/{id}", axum::routing::delete(delete_collector))
}

async fn list_collectors(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<CollectorOverview>>, AppError> {
    let offline_threshold = chrono::Duration::from_std(state.config.collector_offline_threshold)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    let collectors =
        collector_service::list_collectors(&state.db, user.id, offline_threshold).await?;
    Ok(Json(collectors))
}

async fn delete_collector(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(collector_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = collector_service::delete_collector(&state.db, user.id, &collector_id).await?;
    if !deleted {
        return Err(AppError::NotFound(
            "collector not found or access denied".to_string(),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

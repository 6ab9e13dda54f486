use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entities::monitored_target;
use crate::db::services::target_service;
use crate::web::error::AppError;
use crate::web::models::{AddTargetRequest, AuthenticatedUser, UpdateTargetRequest};
use crate::web::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_targets).post(add_target))
        .route("/{id}", axum::routing::put(update_target).delete(delete_target))
}

async fn add_target(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<AddTargetRequest>,
) -> Result<(StatusCode, Json<monitored_target::Model>), AppError> {
    if payload.url.trim().is_empty() {
        return Err(AppError::InvalidInput("url is required".to_string()));
    }

    let target = target_service::add_target(
        &state.db,
        state.scanner.as_ref(),
        user.id,
        &payload.url,
        payload.frequency_hours,
        state.config.default_scan_frequency_hours,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(target)))
}

async fn list_targets(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<monitored_target::Model>>, AppError> {
    let targets = target_service::list_targets(&state.db, user.id).await?;
    Ok(Json(targets))
}

async fn update_target(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(target_id): Path<Uuid>,
    Json(payload): Json<UpdateTargetRequest>,
) -> Result<StatusCode, AppError> {
    target_service::update_target(&state.db, user.id, target_id, payload.frequency_hours).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_target(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(target_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    target_service::delete_target(&state.db, user.id, target_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

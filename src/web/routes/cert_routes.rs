use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::enums::InstanceStatus;
use crate::db::models::{DashboardStats, PaginatedCertificates};
use crate::db::services::cert_service::{self, CertFilter};
use crate::web::error::AppError;
use crate::web::models::{AuthenticatedUser, CertListParams};
use crate::web::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_certificates))
        .route("/missing", delete(delete_missing_instances))
        .route("/{id}", delete(delete_instance))
}

pub fn dashboard_router() -> Router<Arc<AppState>> {
    Router::new().route("/stats", get(dashboard_stats))
}

async fn list_certificates(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<CertListParams>,
) -> Result<Json<PaginatedCertificates>, AppError> {
    let mut filter = CertFilter::new();
    if let Some(collector_id) = params.collector_id {
        filter = filter.collector(collector_id);
    }
    if let Some(search) = params.search {
        filter = filter.search(search);
    }
    filter = filter.expiry_range(params.valid_after, params.valid_before);
    if let Some(trusted) = params.trusted {
        filter = filter.trusted(trusted);
    }
    if let Some(status) = params.status.as_deref() {
        let status = match status {
            "ACTIVE" => InstanceStatus::Active,
            "MISSING" => InstanceStatus::Missing,
            other => {
                return Err(AppError::InvalidInput(format!("unknown status: {other}")));
            }
        };
        filter = filter.status(status);
    }
    let limit = params.limit.unwrap_or(10).min(100);
    let page = params.page.unwrap_or(1).max(1);
    filter = filter.paginate(limit, (page - 1) * limit);

    let result = cert_service::list_certificates(&state.db, user.id, filter).await?;
    Ok(Json(result))
}

async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(instance_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let deleted = cert_service::delete_instance(&state.db, user.id, instance_id).await?;
    if !deleted {
        return Err(AppError::NotFound(
            "instance not found or access denied".to_string(),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_missing_instances(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, AppError> {
    let pruned = cert_service::delete_all_missing_instances(&state.db, user.id).await?;
    Ok(Json(serde_json::json!({ "pruned": pruned })))
}

async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<DashboardStats>, AppError> {
    let offline_threshold = chrono::Duration::from_std(state.config.collector_offline_threshold)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    let stats = cert_service::get_dashboard_stats(&state.db, user.id, offline_threshold).await?;
    Ok(Json(stats))
}

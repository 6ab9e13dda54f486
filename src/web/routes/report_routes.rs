use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use std::sync::Arc;

use crate::db::models::AgentReport;
use crate::db::services::ingest_service;
use crate::web::AppState;
use crate::web::error::AppError;

/// Agent report ingestion. Authenticated by the API key inside the report
/// body, not by the JWT middleware: agents are not browser sessions.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(ingest_report))
}

async fn ingest_report(
    State(state): State<Arc<AppState>>,
    Json(report): Json<AgentReport>,
) -> Result<StatusCode, AppError> {
    if report.agent_id.is_empty() {
        return Err(AppError::InvalidInput("agent_id is required".to_string()));
    }
    ingest_service::process_report(&state.db, report).await?;
    Ok(StatusCode::ACCEPTED)
}

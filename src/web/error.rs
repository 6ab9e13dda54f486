use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::services::ingest_service::IngestError;
use crate::db::services::target_service::TargetError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {msg}"),
            ),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::MissingApiKey => AppError::InvalidInput(err.to_string()),
            IngestError::InvalidApiKey => AppError::Unauthorized(err.to_string()),
            IngestError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

impl From<TargetError> for AppError {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::InvalidTarget(_)
            | TargetError::ScanFailed(_)
            | TargetError::InvalidFrequency => AppError::InvalidInput(err.to_string()),
            TargetError::AlreadyMonitored => AppError::Conflict(err.to_string()),
            TargetError::NotFound => AppError::NotFound(err.to_string()),
            TargetError::Ingest(e) => e.into(),
            TargetError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

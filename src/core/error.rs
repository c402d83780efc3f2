use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::executor::ExecutorError;
use crate::pagination::PaginationError;
use crate::storage::pool::PoolError;
use crate::tracker::relevance::RelevanceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Pagination error: {0}")]
    Pagination(#[from] PaginationError),

    #[error("Relevance error: {0}")]
    Relevance(#[from] RelevanceError),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidRequest(_) | AppError::Pagination(_) | AppError::Relevance(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::Pool(PoolError::Exhausted { .. }) => 503,
            _ => 500,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internal details stay in the log.
        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(AppError::NotFound("x".into()).status_code(), 404);
        assert_eq!(AppError::Internal("x".into()).status_code(), 500);
        assert_eq!(
            AppError::Pagination(PaginationError::OutOfRange { page: 3, total_pages: 2 })
                .status_code(),
            400
        );
    }

    #[test]
    fn test_pool_exhaustion_is_unavailable() {
        let err = AppError::from(PoolError::Exhausted {
            timeout: Duration::from_secs(1),
        });
        assert_eq!(err.status_code(), 503);
        assert_eq!(AppError::from(PoolError::Closed).status_code(), 500);
    }

    #[test]
    fn test_server_errors_hide_details() {
        let response = AppError::Internal("secret path".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AppError::NotFound("Report 4 not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

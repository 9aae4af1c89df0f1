use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tempo_proto::ErrorBody;
use tempo_storage::StorageError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request, rejected before anything is persisted.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The task changed state underneath the request; re-fetch before retrying.
    #[error("{0}")]
    Conflict(String),

    #[error("task store unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn task_not_found(id: impl std::fmt::Display) -> Self {
        ApiError::NotFound(format!("task {id} not found"))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Storage(_) => "store_unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Validation(m) | ApiError::NotFound(m) | ApiError::Conflict(m) => m.clone(),
            // store and runtime details stay in the logs
            ApiError::Storage(e) => {
                error!(error = %e, "task store error");
                "task store unavailable, retry later".to_owned()
            }
            ApiError::Internal(m) => {
                error!(message = %m, "internal error");
                "internal server error".to_owned()
            }
        };

        let body = ErrorBody {
            error: self.code().to_owned(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}

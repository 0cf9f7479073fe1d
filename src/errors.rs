use crate::services::blob_repository::RepositoryError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::bad_request(format!("malformed form data: {}", err.body_text()))
    }
}

/// Store details are logged here and kept out of the response body.
impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::PayloadTooLarge { .. } => AppError::bad_request("File too big"),
            RepositoryError::InvalidKey(_) => AppError::bad_request(err.to_string()),
            RepositoryError::NotFound => AppError::not_found("File not found"),
            RepositoryError::TimedOut => {
                tracing::warn!("request deadline expired");
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "Storage request timed out")
            }
            RepositoryError::Cancelled => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down")
            }
            RepositoryError::List(_) => {
                tracing::error!(error = %err, "store listing failed");
                AppError::internal("Failed to list objects in storage")
            }
            RepositoryError::Head { .. } => {
                tracing::error!(error = %err, "store metadata read failed");
                AppError::internal("Failed to read object metadata")
            }
            RepositoryError::Put { .. } => {
                tracing::error!(error = %err, "store write failed");
                AppError::internal("Failed to upload file to storage")
            }
            RepositoryError::Body { .. } => {
                tracing::error!(error = %err, "store read failed");
                AppError::internal("Failed to get object from storage")
            }
        }
    }
}

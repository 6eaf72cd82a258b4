//! Common error types for the image generation server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    /// Caller fault: the request can succeed if its parameters change.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Failed to load pipeline: {0}")]
    PipelineConstruction(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Generation queue is full ({0} pending)")]
    QueueFull(usize),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the failure is the caller's fault rather than the server's
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::InvalidRequest(_) | AppError::Json(_))
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    /// Flat copy of the message for clients that only read `detail`
    pub detail: String,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::Image(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", Some("image_encoding")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::PipelineConstruction(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", Some("pipeline_unavailable")),
            AppError::Inference(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", Some("inference_failed")),
            AppError::QueueFull(_) => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("queue_full")),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        };

        let message = self.to_string();
        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: message.clone(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
            detail: message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

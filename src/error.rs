//! Error handling for the salon monitor

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (duplicate)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Video stream error (open/read failures, fatal to one session)
    #[error("Stream error: {0}")]
    Stream(String),

    /// Face detection service error
    #[error("Detection error: {0}")]
    Detection(String),

    /// Backend API error (roster/directory/report)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::Stream(msg) => (StatusCode::BAD_GATEWAY, "STREAM_ERROR", msg.clone()),
            Error::Detection(msg) => (StatusCode::BAD_GATEWAY, "DETECTION_ERROR", msg.clone()),
            Error::Backend(msg) => (StatusCode::BAD_GATEWAY, "BACKEND_ERROR", msg.clone()),
            Error::Parse(msg) => (StatusCode::BAD_REQUEST, "PARSE_ERROR", msg.clone()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

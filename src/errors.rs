use crate::driver::{DriverError, WriteError};
use axum::{
    Json,
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
    /// Set for failed stream writes: bytes committed before the failure.
    pub bytes_written: Option<u64>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            bytes_written: None,
        }
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
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(bytes_written) = self.bytes_written {
            body["bytes_written"] = json!(bytes_written);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<DriverError> for AppError {
    fn from(err: DriverError) -> Self {
        let status = match &err {
            DriverError::PathNotFound { .. } => StatusCode::NOT_FOUND,
            DriverError::InvalidPath { .. } | DriverError::InvalidOption(_) => {
                StatusCode::BAD_REQUEST
            }
            DriverError::Unsupported => StatusCode::NOT_IMPLEMENTED,
            DriverError::Store { .. } | DriverError::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "storage operation failed");
        }
        Self::new(status, err.to_string())
    }
}

impl From<WriteError> for AppError {
    fn from(err: WriteError) -> Self {
        let mut app = AppError::from(err.source);
        app.bytes_written = Some(err.bytes_written);
        app
    }
}

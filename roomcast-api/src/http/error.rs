// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert roomcast_core errors to HTTP errors
impl From<roomcast_core::Error> for AppError {
    fn from(err: roomcast_core::Error) -> Self {
        use roomcast_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::Unauthorized(msg) => Self::unauthorized(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal("Internal server error")
            }
        }
    }
}

/// Convert backplane errors to HTTP errors
impl From<roomcast_cluster::Error> for AppError {
    fn from(err: roomcast_cluster::Error) -> Self {
        use roomcast_cluster::Error;

        match err {
            Error::NotConnected(id) => Self::not_found(format!("Connection {id} is not connected")),
            Error::RelayUnavailable(msg) => {
                tracing::warn!("Relay unavailable: {}", msg);
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable")
            }
            Error::Configuration(msg) => {
                tracing::error!("Backplane configuration error: {}", msg);
                Self::internal("Internal server error")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal("Data processing error")
            }
        }
    }
}

/// Convert serde_json errors to HTTP errors
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {err}"))
    }
}

/// Convert anyhow errors to HTTP errors
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {}", err);
        Self::internal("Internal server error")
    }
}

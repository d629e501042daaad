//! Heimdall error types

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Heimdall error types
#[derive(Debug, thiserror::Error)]
pub enum HeimdallError {
    // Backend/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Minting a backend assertion failed (bad key material, clock before epoch).
    #[error("signing error: {0}")]
    Signing(String),
}

impl HeimdallError {
    /// Whether the error came from talking to the GraphQL backend.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_))
    }

    /// HTTP status the error maps to when surfaced to a caller.
    pub fn status_code(&self) -> StatusCode {
        if self.is_backend_failure() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<reqwest::Error> for HeimdallError {
    fn from(err: reqwest::Error) -> Self {
        HeimdallError::Http(err.to_string())
    }
}

/// Errors are rendered as a GraphQL-shaped body so clients parse them the
/// same way they parse backend errors.
impl IntoResponse for HeimdallError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "errors": [{ "message": self.to_string() }]
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Result type alias for Heimdall operations
pub type Result<T> = std::result::Result<T, HeimdallError>;

//! Application error types and result alias.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// DNS or connect failure
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Attempt exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Gateway answered 404 for the requested content
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Gateway answered with a 5xx status
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Any other non-2xx status
    #[error("Unexpected HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Downloaded bytes don't match the expected hash or size
    #[error("Verification mismatch: {0}")]
    VerificationMismatch(String),

    /// Registry empty or every gateway filtered out
    #[error("No candidate gateways: {0}")]
    NoCandidates(String),

    /// Caller-initiated abort
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict error (e.g., duplicate gateway name)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Key/value storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Address parse error
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Classify an HTTP status that is not a success into the error taxonomy.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            404 => AppError::NotFound(url.to_string()),
            500..=599 => AppError::ServerError {
                status,
                message: url.to_string(),
            },
            _ => AppError::HttpStatus {
                status,
                message: url.to_string(),
            },
        }
    }

    /// True for connect/DNS failures and timeouts.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AppError::NetworkUnreachable(_) | AppError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return AppError::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            return AppError::from_status(status.as_u16(), &url);
        }
        if err.is_connect() || err.is_request() {
            return AppError::NetworkUnreachable(err.to_string());
        }
        AppError::NetworkUnreachable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NetworkUnreachable(msg) => {
                (StatusCode::BAD_GATEWAY, "NETWORK_UNREACHABLE", msg.clone())
            }
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::ServerError { .. } | AppError::HttpStatus { .. } => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", self.to_string())
            }
            AppError::VerificationMismatch(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VERIFICATION_MISMATCH",
                msg.clone(),
            ),
            AppError::NoCandidates(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_GATEWAYS_AVAILABLE",
                msg.clone(),
            ),
            AppError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CANCELLED",
                "Operation cancelled".to_string(),
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Storage(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                msg.clone(),
            ),
            AppError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                "IO operation failed".to_string(),
            ),
            AppError::AddrParse(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ADDR_PARSE_ERROR",
                "Invalid address".to_string(),
            ),
            AppError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "JSON_ERROR",
                "Invalid JSON".to_string(),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        // Log the error
        tracing::error!(error = %self, code = code, "Request error");

        let body = Json(json!({
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_not_found() {
        let err = AppError::from_status(404, "https://gw.example/ipfs/abc");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_from_status_server_error() {
        let err = AppError::from_status(503, "https://gw.example/ipfs/abc");
        assert!(matches!(err, AppError::ServerError { status: 503, .. }));
    }

    #[test]
    fn test_from_status_other() {
        let err = AppError::from_status(429, "u");
        assert!(matches!(err, AppError::HttpStatus { status: 429, .. }));
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(AppError::Timeout("x".into()).is_connectivity());
        assert!(AppError::NetworkUnreachable("x".into()).is_connectivity());
        assert!(!AppError::Cancelled.is_connectivity());
        assert!(!AppError::NotFound("x".into()).is_connectivity());
    }

    #[test]
    fn test_cancelled_is_distinct_from_timeout() {
        assert!(AppError::Cancelled.is_cancelled());
        assert!(!AppError::Timeout("deadline".into()).is_cancelled());
    }

    #[test]
    fn test_into_response_status_codes() {
        let resp = AppError::NoCandidates("empty".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let resp = AppError::Validation("bad".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = AppError::NotFound("gone".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

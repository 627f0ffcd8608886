//! Error types for MedSearch services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each failure mode of the refinement pipeline
//! - HTTP status code mapping
//! - Structured error responses that never leak internal causes
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    QueryRejected,

    // Rate limiting (6xxx)
    RateLimited,

    // External service errors (8xxx)
    LiteratureSourceError,
    LiteratureSourceTimeout,
    OracleError,
    OracleTimeout,
    OracleProtocolError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::QueryRejected => 1002,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // External (8xxx)
            ErrorCode::LiteratureSourceError => 8001,
            ErrorCode::LiteratureSourceTimeout => 8002,
            ErrorCode::OracleError => 8003,
            ErrorCode::OracleTimeout => 8004,
            ErrorCode::OracleProtocolError => 8005,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Query rejected: {reason}")]
    QueryRejected { reason: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Literature source errors
    #[error("Literature source error: {message}")]
    LiteratureSource { message: String },

    #[error("Literature source timeout after {timeout_ms}ms")]
    SourceTimeout { timeout_ms: u64 },

    // Oracle errors
    #[error("Oracle error: {message}")]
    Oracle {
        message: String,
        status: Option<u16>,
    },

    #[error("Oracle timeout after {timeout_ms}ms")]
    OracleTimeout { timeout_ms: u64 },

    #[error("Oracle protocol error: {message}")]
    OracleProtocol { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::QueryRejected { .. } => ErrorCode::QueryRejected,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::LiteratureSource { .. } => ErrorCode::LiteratureSourceError,
            AppError::SourceTimeout { .. } => ErrorCode::LiteratureSourceTimeout,
            AppError::Oracle { .. } => ErrorCode::OracleError,
            AppError::OracleTimeout { .. } => ErrorCode::OracleTimeout,
            AppError::OracleProtocol { .. } => ErrorCode::OracleProtocolError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 422 Unprocessable Entity
            AppError::QueryRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Internal { .. } |
            AppError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::LiteratureSource { .. } |
            AppError::Oracle { .. } |
            AppError::OracleProtocol { .. } => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::SourceTimeout { .. } |
            AppError::OracleTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether repeating the same oracle call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::OracleTimeout { .. } => true,
            AppError::Oracle { status: None, .. } => true,
            AppError::Oracle { status: Some(code), .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Message safe to show to API callers
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            match self.status_code() {
                StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                    "An upstream service failed while processing the search".to_string()
                }
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log based on severity; the full cause stays in the logs only
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match &self {
            AppError::Validation { field: Some(field), .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message: self.public_message(),
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<quick_xml::Error> for AppError {
    fn from(err: quick_xml::Error) -> Self {
        AppError::LiteratureSource {
            message: format!("Malformed XML: {}", err),
        }
    }
}

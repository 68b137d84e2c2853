//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 422 Unprocessable Entity - Input parsed but failed validation.
    UnprocessableEntity {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details (not exposed to client in production).
        details: Option<String>,
    },

    /// 503 Service Unavailable - The Bluetooth radio or engine is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_request",
    "message": "The provided value is not valid",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "bluetooth_adapter_not_found").
    #[schema(example = "invalid_request")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "The provided value is not valid")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest {
                error_code,
                message,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::NotFound {
                error_code,
                message,
            } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::UnprocessableEntity {
                error_code,
                message,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                // Log internal errors
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::ServiceUnavailable {
                error_code,
                message,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::UnprocessableEntity { message, .. } => {
                write!(f, "Unprocessable Entity: {message}")
            }
            Self::InternalError { message, .. } => {
                write!(f, "Internal Error: {message}")
            }
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from nearlock_core errors.
impl From<nearlock_core::NearlockError> for ApiError {
    fn from(err: nearlock_core::NearlockError) -> Self {
        use nearlock_core::NearlockError;

        match &err {
            NearlockError::AdapterNotFound
            | NearlockError::AdapterPoweredOff
            | NearlockError::ScanFailed(_)
            | NearlockError::EngineStopped => Self::ServiceUnavailable {
                error_code: err.error_code().to_string(),
                message: err.to_string(),
            },
            NearlockError::UnknownPeripheral(_) => Self::NotFound {
                error_code: err.error_code().to_string(),
                message: err.to_string(),
            },
            NearlockError::ConfigValidationError(_) => Self::UnprocessableEntity {
                error_code: err.error_code().to_string(),
                message: err.to_string(),
            },
            NearlockError::ConfigNotFound(_)
            | NearlockError::ConfigParseError(_)
            | NearlockError::PersistenceError(_)
            | NearlockError::IoError(_) => Self::InternalError {
                error_code: err.error_code().to_string(),
                message: err.to_string(),
                details: None,
            },
        }
    }
}

impl From<nearlock_core::ConfigError> for ApiError {
    fn from(err: nearlock_core::ConfigError) -> Self {
        Self::from(nearlock_core::NearlockError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprocessable_entity_error() {
        let err = ApiError::UnprocessableEntity {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Unprocessable Entity"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "test_error".to_string(),
            message: "Test message".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
    }

    #[test]
    fn test_engine_stopped_maps_to_service_unavailable() {
        let err = ApiError::from(nearlock_core::NearlockError::EngineStopped);
        assert!(matches!(err, ApiError::ServiceUnavailable { .. }));
    }
}

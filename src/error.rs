// HTTP API Error Types
use axum::{extract::rejection::JsonRejection, response::IntoResponse, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::auth::AuthError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    InvalidJson(String),
    TenantRequired(String),

    // 401 Unauthorized
    Unauthenticated(String),

    // 403 Forbidden
    TenantMismatch(String),

    // 500 Internal Server Error
    InternalServerError(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidJson(_) => 400,
            ApiError::TenantRequired(_) => 400,
            ApiError::Unauthenticated(_) => 401,
            ApiError::TenantMismatch(_) => 403,
            ApiError::InternalServerError(_) => 500,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::InvalidJson(msg) => msg,
            ApiError::TenantRequired(msg) => msg,
            ApiError::Unauthenticated(msg) => msg,
            ApiError::TenantMismatch(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "success": false,
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        })
    }

    /// Get error code for client handling.
    ///
    /// Authentication and tenant rejections keep distinct codes so clients can
    /// tell "log in again" apart from "access denied".
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::TenantRequired(_) => "TENANT_REQUIRED",
            ApiError::Unauthenticated(_) => "UNAUTHENTICATED",
            ApiError::TenantMismatch(_) => "TENANT_MISMATCH",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidJson(rejection.body_text())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated(reason) => ApiError::Unauthenticated(reason),
            AuthError::TenantRequired => {
                ApiError::TenantRequired("A tenant is required for this operation".to_string())
            }
            // Do not echo the bound organization back to the caller
            AuthError::TenantMismatch { .. } => {
                ApiError::TenantMismatch("Access to the requested tenant is denied".to_string())
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

use thiserror::Error;

/// Rejections produced by the request pipeline. All are terminal for the
/// request or connection that triggered them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("No tenant could be resolved for this request")]
    TenantRequired,

    #[error("Tenant '{requested}' does not match bound organization '{bound}'")]
    TenantMismatch { bound: String, requested: String },
}

impl AuthError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        AuthError::Unauthenticated(reason.into())
    }

    /// Stable code for clients and logs
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated(_) => "UNAUTHENTICATED",
            AuthError::TenantRequired => "TENANT_REQUIRED",
            AuthError::TenantMismatch { .. } => "TENANT_MISMATCH",
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,
}

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::auth::{AuthError, IdentityVerifier};
use crate::tenant::{OperationSpec, ScopedExecutionContext, TenantScopeEnforcer, TENANT_HINT_HEADER};

/// Verifier and enforcer composed in request order.
///
/// Constructed once at startup and cloned into every route guard.
#[derive(Clone, Debug)]
pub struct AuthPipeline {
    verifier: Arc<IdentityVerifier>,
    enforcer: Arc<TenantScopeEnforcer>,
}

impl AuthPipeline {
    pub fn new(verifier: IdentityVerifier, enforcer: TenantScopeEnforcer) -> Self {
        Self {
            verifier: Arc::new(verifier),
            enforcer: Arc::new(enforcer),
        }
    }

    /// Authorize an HTTP request from its headers
    pub fn authorize(
        &self,
        headers: &HeaderMap,
        operation: &OperationSpec,
    ) -> Result<ScopedExecutionContext, AuthError> {
        let token = extract_jwt_from_headers(headers)?;
        self.authorize_token(token, tenant_hint_from_headers(headers), operation)
    }

    /// Authorize a raw token plus optional tenant hint (realtime handshakes)
    pub fn authorize_token(
        &self,
        token: &str,
        tenant_hint: Option<&str>,
        operation: &OperationSpec,
    ) -> Result<ScopedExecutionContext, AuthError> {
        let identity = self.verifier.verify(token)?;
        self.enforcer.enforce(Arc::new(identity), tenant_hint, operation)
    }
}

/// Extract JWT token from Authorization header
pub fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| AuthError::unauthenticated("Missing Authorization header"))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AuthError::unauthenticated("Invalid Authorization header format"))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        Some(_) => Err(AuthError::unauthenticated("Empty JWT token")),
        None => Err(AuthError::unauthenticated(
            "Authorization header must use Bearer token format",
        )),
    }
}

pub fn tenant_hint_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(TENANT_HINT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

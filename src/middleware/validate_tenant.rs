use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::auth::AuthPipeline;
use crate::error::ApiError;
use crate::tenant::OperationSpec;

/// Per-route guard state: the shared pipeline plus the route's static
/// operation config.
#[derive(Clone)]
pub struct RouteGuard {
    pub pipeline: AuthPipeline,
    pub operation: &'static OperationSpec,
}

impl RouteGuard {
    pub fn new(pipeline: &AuthPipeline, operation: &'static OperationSpec) -> Self {
        Self {
            pipeline: pipeline.clone(),
            operation,
        }
    }
}

/// Verifies the bearer token, enforces the tenant scope and injects the
/// resulting `ScopedExecutionContext` into request extensions.
pub async fn validate_tenant_middleware(
    State(guard): State<RouteGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = guard
        .pipeline
        .authorize(request.headers(), guard.operation)
        .map_err(|e| {
            tracing::debug!("Rejected '{}': {}", guard.operation.name, e);
            ApiError::from(e)
        })?;

    tracing::debug!(
        "Authorized '{}' for subject '{}' (tenant: {:?})",
        guard.operation.name,
        context.identity().subject_id(),
        context.tenant_id()
    );

    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

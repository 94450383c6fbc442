// handlers/tenant.rs - GET /api/tenant/context handler (tenant-scoped)

use axum::extract::Extension;

use crate::middleware::{ApiResponse, ApiResult};
use crate::tenant::ScopedExecutionContext;

/// Echoes the resolved tenant and identity the request runs under.
pub async fn context_get(
    Extension(context): Extension<ScopedExecutionContext>,
) -> ApiResult<ScopedExecutionContext> {
    Ok(ApiResponse::success(context))
}

// handlers/whoami.rs - GET /api/auth/whoami handler (tenant-exempt)

use axum::extract::Extension;

use crate::auth::IdentityRecord;
use crate::middleware::{ApiResponse, ApiResult};
use crate::tenant::ScopedExecutionContext;

/// Returns the verified identity of the caller. Works for principals that
/// are not bound to any tenant yet.
pub async fn whoami_get(
    Extension(context): Extension<ScopedExecutionContext>,
) -> ApiResult<IdentityRecord> {
    Ok(ApiResponse::success(context.identity().clone()))
}

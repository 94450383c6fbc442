//! Tenant resolution and cross-tenant rejection.

use std::sync::Arc;

use serde::Serialize;

use crate::auth::{AuthError, IdentityRecord};

/// Header carrying the caller-supplied tenant hint
pub const TENANT_HINT_HEADER: &str = "x-tenant-id";

/// Whether an operation requires a resolved tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantScope {
    Required,
    /// Skip resolution and mismatch checks entirely (health, whoami, ...)
    Exempt,
}

/// Static per-operation configuration consulted by the enforcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSpec {
    pub name: &'static str,
    pub tenant_scope: TenantScope,
}

impl OperationSpec {
    pub const fn tenant_scoped(name: &'static str) -> Self {
        Self { name, tenant_scope: TenantScope::Required }
    }

    pub const fn tenant_exempt(name: &'static str) -> Self {
        Self { name, tenant_scope: TenantScope::Exempt }
    }
}

/// Per-request (or per-connection) state carrying the resolved tenant.
///
/// Read-only once built; clone it to share across tasks of the same request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedExecutionContext {
    tenant_id: Option<String>,
    identity: Arc<IdentityRecord>,
}

impl ScopedExecutionContext {
    /// `None` only when the operation was tenant-exempt.
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn identity(&self) -> &IdentityRecord {
        &self.identity
    }
}

#[derive(Debug, Clone, Default)]
pub struct TenantScopeEnforcer {
    audit_logging: bool,
}

impl TenantScopeEnforcer {
    pub fn new(audit_logging: bool) -> Self {
        Self { audit_logging }
    }

    pub fn enforce(
        &self,
        identity: Arc<IdentityRecord>,
        tenant_hint: Option<&str>,
        operation: &OperationSpec,
    ) -> Result<ScopedExecutionContext, AuthError> {
        if operation.tenant_scope == TenantScope::Exempt {
            return Ok(ScopedExecutionContext { tenant_id: None, identity });
        }

        let hint = tenant_hint.map(str::trim).filter(|h| !h.is_empty());

        // When an organization is bound, every tenant value presented must agree with it
        if let Some(bound) = identity.organization_id() {
            let conflicting = identity
                .tenant_id()
                .into_iter()
                .chain(hint)
                .find(|candidate| *candidate != bound);

            if let Some(requested) = conflicting {
                if self.audit_logging {
                    tracing::warn!(
                        target: "security",
                        subject = identity.subject_id(),
                        operation = operation.name,
                        bound,
                        requested,
                        "Cross-tenant access rejected"
                    );
                } else {
                    tracing::warn!(
                        "Tenant mismatch for subject '{}' on '{}'",
                        identity.subject_id(),
                        operation.name
                    );
                }
                return Err(AuthError::TenantMismatch {
                    bound: bound.to_string(),
                    requested: requested.to_string(),
                });
            }
        }

        let tenant_id = identity
            .tenant_id()
            .or(identity.organization_id())
            .or(hint)
            .map(str::to_string)
            .ok_or(AuthError::TenantRequired)?;

        tracing::debug!(
            "Tenant '{}' resolved for subject '{}' on '{}'",
            tenant_id,
            identity.subject_id(),
            operation.name
        );

        Ok(ScopedExecutionContext { tenant_id: Some(tenant_id), identity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;

    const SCOPED: OperationSpec = OperationSpec::tenant_scoped("test.scoped");
    const EXEMPT: OperationSpec = OperationSpec::tenant_exempt("test.exempt");

    fn identity(claims: Claims) -> Arc<IdentityRecord> {
        Arc::new(IdentityRecord::from(claims))
    }

    #[test]
    fn hint_conflicting_with_organization_is_mismatch() {
        let enforcer = TenantScopeEnforcer::default();
        let err = enforcer
            .enforce(identity(Claims::new("u", 1).unwrap().with_organization("org-1")), Some("org-2"), &SCOPED)
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::TenantMismatch { bound: "org-1".into(), requested: "org-2".into() }
        );
    }

    #[test]
    fn tenant_claim_conflicting_with_organization_is_mismatch() {
        let enforcer = TenantScopeEnforcer::new(true);
        let claims = Claims::new("u", 1).unwrap().with_tenant("org-7").with_organization("org-1");
        let err = enforcer.enforce(identity(claims), None, &SCOPED).unwrap_err();
        assert!(matches!(err, AuthError::TenantMismatch { .. }));
    }

    #[test]
    fn hint_is_used_when_identity_has_no_tenant() {
        let enforcer = TenantScopeEnforcer::default();
        let ctx = enforcer.enforce(identity(Claims::new("u", 1).unwrap()), Some("org-9"), &SCOPED).unwrap();
        assert_eq!(ctx.tenant_id(), Some("org-9"));
        assert_eq!(ctx.identity().subject_id(), "u");
    }

    #[test]
    fn no_tenant_anywhere_is_required_error() {
        let enforcer = TenantScopeEnforcer::default();
        let err = enforcer.enforce(identity(Claims::new("u", 1).unwrap()), None, &SCOPED).unwrap_err();
        assert_eq!(err, AuthError::TenantRequired);

        let err = enforcer.enforce(identity(Claims::new("u", 1).unwrap()), Some("  "), &SCOPED).unwrap_err();
        assert_eq!(err, AuthError::TenantRequired);
    }

    #[test]
    fn matching_hint_is_accepted() {
        let enforcer = TenantScopeEnforcer::default();
        let ctx = enforcer
            .enforce(identity(Claims::new("u", 1).unwrap().with_organization("org-1")), Some("org-1"), &SCOPED)
            .unwrap();
        assert_eq!(ctx.tenant_id(), Some("org-1"));
    }

    #[test]
    fn identity_tenant_without_organization_ignores_hint() {
        let enforcer = TenantScopeEnforcer::default();
        let ctx = enforcer
            .enforce(identity(Claims::new("u", 1).unwrap().with_tenant("tenant-a")), Some("tenant-b"), &SCOPED)
            .unwrap();
        assert_eq!(ctx.tenant_id(), Some("tenant-a"));
    }

    #[test]
    fn exempt_operations_skip_resolution() {
        let enforcer = TenantScopeEnforcer::default();
        let ctx = enforcer
            .enforce(identity(Claims::new("u", 1).unwrap().with_organization("org-1")), Some("org-2"), &EXEMPT)
            .unwrap();
        assert_eq!(ctx.tenant_id(), None);
    }
}

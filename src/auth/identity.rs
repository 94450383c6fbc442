use serde::{Deserialize, Serialize};

use super::Claims;

/// Coarse permission tag carried in the `role` claim
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Guardian,
    Ward,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Guardian => "guardian",
            Role::Ward => "ward",
            Role::Other(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "guardian" => Role::Guardian,
            "ward" => Role::Ward,
            _ => Role::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// Verified "who is calling".
///
/// Built from claims on every verification and never mutated afterwards;
/// fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    subject_id: String,
    email: Option<String>,
    role: Option<Role>,
    tenant_id: Option<String>,
    organization_id: Option<String>,
}

impl IdentityRecord {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Contact identifier only; never used for authorization.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }
}

impl From<Claims> for IdentityRecord {
    fn from(claims: Claims) -> Self {
        let organization_id = non_empty(claims.organization_id);
        let tenant_id = non_empty(claims.tenant_id).or_else(|| organization_id.clone());

        Self {
            subject_id: claims.sub,
            email: non_empty(claims.email),
            role: non_empty(claims.role).map(Role::from),
            tenant_id,
            organization_id,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_falls_back_to_organization() {
        let identity = IdentityRecord::from(Claims::new("user-1", 1).unwrap().with_organization("org-1"));
        assert_eq!(identity.tenant_id(), Some("org-1"));
        assert_eq!(identity.organization_id(), Some("org-1"));
    }

    #[test]
    fn tenant_claim_wins_over_organization() {
        let claims = Claims::new("user-1", 1).unwrap()
            .with_tenant("tenant-a")
            .with_organization("org-1");
        let identity = IdentityRecord::from(claims);
        assert_eq!(identity.tenant_id(), Some("tenant-a"));
    }

    #[test]
    fn blank_claims_are_treated_as_absent() {
        let claims = Claims::new("user-1", 1).unwrap().with_tenant("  ").with_email("");
        let identity = IdentityRecord::from(claims);
        assert_eq!(identity.tenant_id(), None);
        assert_eq!(identity.email(), None);
        assert_eq!(identity.role(), None);
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(Role::from("Guardian".to_string()), Role::Guardian);
        assert_eq!(Role::from("nurse".to_string()), Role::Other("nurse".to_string()));
    }
}

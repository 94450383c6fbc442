pub mod error;
pub mod identity;
pub mod verifier;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

pub use error::{AuthError, JwtError};
pub use identity::{IdentityRecord, Role};
pub use verifier::IdentityVerifier;

/// JWT claims as issued by the auth service.
///
/// Only `sub` and `exp` are mandatory; everything else may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

impl Claims {
    /// Claims for `sub` valid for `expiry_hours` from now. Fails when the
    /// expiry falls outside the representable date range.
    pub fn new(sub: impl Into<String>, expiry_hours: u64) -> Result<Self, JwtError> {
        let now = Utc::now();
        let exp = i64::try_from(expiry_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                JwtError::TokenGeneration(format!("token lifetime of {} hours is out of range", expiry_hours))
            })?
            .timestamp();

        Ok(Self {
            sub: sub.into(),
            email: None,
            role: None,
            tenant_id: None,
            organization_id: None,
            exp,
            iat: now.timestamp(),
        })
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Override the expiry with an absolute unix timestamp.
    pub fn expiring_at(mut self, exp: i64) -> Self {
        self.exp = exp;
        self
    }
}

/// Sign claims with HS256. Used by tests and the dev CLI; token issuance
/// proper belongs to the auth service.
pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    let header = Header::default();

    encode(&header, claims, &encoding_key)
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_relative_to_now() {
        let claims = Claims::new("user-1", 2).unwrap();
        assert_eq!(claims.exp - claims.iat, 2 * 3600);
    }

    #[test]
    fn out_of_range_lifetime_is_rejected() {
        for hours in [u64::MAX, i64::MAX as u64, 10_000_000_000] {
            let err = Claims::new("user-1", hours).unwrap_err();
            assert!(matches!(err, JwtError::TokenGeneration(_)), "hours={hours}: {err:?}");
        }
    }
}

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};

use super::{AuthError, Claims, IdentityRecord, JwtError};

/// Validates bearer tokens and produces identity records.
///
/// Stateless: the same token yields the same record for as long as it is valid.
#[derive(Clone)]
pub struct IdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn from_secret(secret: &str) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::InvalidSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // Exact expiry, no grace window
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn verify(&self, token: &str) -> Result<IdentityRecord, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::unauthenticated("Missing bearer token"));
        }

        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "Token has expired",
                    ErrorKind::InvalidSignature => "Token signature is invalid",
                    ErrorKind::MissingRequiredClaim(_) => "Token is missing required claims",
                    _ => "Token is malformed",
                };
                tracing::debug!("Token rejected: {}", e);
                AuthError::unauthenticated(reason)
            })?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(AuthError::unauthenticated("Token subject is empty"));
        }

        Ok(IdentityRecord::from(token_data.claims))
    }
}

impl std::fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

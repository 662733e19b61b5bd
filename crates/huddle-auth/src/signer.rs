//! Token signing for development and tests.
//!
//! Production tokens come from the external identity service; this exists so
//! `huddle token` and the integration tests can mint tokens with the same
//! shared secret the verifier uses.

use chrono::Utc;
use huddle_core::PrincipalId;
use jsonwebtoken::{EncodingKey, Header, encode};

use crate::errors::AuthError;
use crate::verifier::Claims;

/// Sign arbitrary claims with `secret` (HS256).
pub fn sign_claims(secret: &str, claims: &Claims) -> Result<String, AuthError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Invalid(e.to_string()))
}

/// Issue a token for `principal` valid for `ttl_secs` from now.
pub fn issue_token(secret: &str, principal: PrincipalId, ttl_secs: i64) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    sign_claims(
        secret,
        &Claims {
            user_id: principal.get(),
            exp: now + ttl_secs,
            iat: Some(now),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_has_three_segments() {
        let token = issue_token("s", PrincipalId::new(1), 60).unwrap();
        assert_eq!(token.split('.').count(), 3);
    }
}

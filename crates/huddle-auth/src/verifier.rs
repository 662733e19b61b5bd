//! JWT verification.

use huddle_core::PrincipalId;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AuthError;

/// Claims carried by a connection token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal the token was issued to.
    pub user_id: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Turns a presented token into a principal ID.
pub trait CredentialVerifier: Send + Sync {
    /// Verify `token`. `None` means the client sent no token at all.
    fn verify(&self, token: Option<&str>) -> Result<PrincipalId, AuthError>;
}

/// HS256 verifier over a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for `secret`, tolerating `leeway_secs` of clock skew.
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: Option<&str>) -> Result<PrincipalId, AuthError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let Some(token) = token else {
            return Err(AuthError::Missing);
        };

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                other => AuthError::Invalid(format!("{other:?}")),
            }
        })?;

        Ok(PrincipalId::new(data.claims.user_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{issue_token, sign_claims};
    use assert_matches::assert_matches;
    use chrono::Utc;

    const SECRET: &str = "test-secret";

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(SECRET, 0)
    }

    #[test]
    fn valid_token_yields_principal() {
        let token = issue_token(SECRET, PrincipalId::new(7), 3600).unwrap();
        assert_eq!(verifier().verify(Some(&token)).unwrap(), PrincipalId::new(7));
    }

    #[test]
    fn missing_token() {
        assert_eq!(verifier().verify(None), Err(AuthError::Missing));
    }

    #[test]
    fn empty_token_counts_as_missing() {
        assert_eq!(verifier().verify(Some("")), Err(AuthError::Missing));
        assert_eq!(verifier().verify(Some("   ")), Err(AuthError::Missing));
    }

    #[test]
    fn expired_token() {
        let claims = Claims {
            user_id: 7,
            exp: Utc::now().timestamp() - 3600,
            iat: None,
        };
        let token = sign_claims(SECRET, &claims).unwrap();
        assert_eq!(verifier().verify(Some(&token)), Err(AuthError::Expired));
    }

    #[test]
    fn leeway_accepts_recently_expired() {
        let claims = Claims {
            user_id: 7,
            exp: Utc::now().timestamp() - 5,
            iat: None,
        };
        let token = sign_claims(SECRET, &claims).unwrap();
        let lenient = JwtVerifier::new(SECRET, 60);
        assert_eq!(lenient.verify(Some(&token)).unwrap(), PrincipalId::new(7));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = issue_token("other-secret", PrincipalId::new(7), 3600).unwrap();
        assert_matches!(verifier().verify(Some(&token)), Err(AuthError::Invalid(_)));
    }

    #[test]
    fn garbage_is_invalid() {
        assert_matches!(
            verifier().verify(Some("not.a.jwt")),
            Err(AuthError::Invalid(_))
        );
    }

    #[test]
    fn expired_with_wrong_secret_is_invalid() {
        // Signature is checked before expiry, so a forged stale token
        // never earns the "retry with a new token" code.
        let claims = Claims {
            user_id: 7,
            exp: Utc::now().timestamp() - 3600,
            iat: None,
        };
        let token = sign_claims("other-secret", &claims).unwrap();
        assert_matches!(verifier().verify(Some(&token)), Err(AuthError::Invalid(_)));
    }
}

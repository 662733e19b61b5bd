//! Auth error types and their close codes.

/// Close code sent when the token has expired.
pub const CLOSE_EXPIRED: u16 = 4000;
/// Close code sent when the token is present but unusable.
pub const CLOSE_INVALID: u16 = 4001;
/// Close code sent when no token was presented.
pub const CLOSE_MISSING: u16 = 4002;

/// Why a connection could not be authenticated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `token` query parameter, or an empty one.
    #[error("token missing")]
    Missing,

    /// Signature valid but `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// Bad signature, malformed token, missing claim, or unknown principal.
    #[error("token invalid: {0}")]
    Invalid(String),
}

impl AuthError {
    /// Application close code for the rejected handshake.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Expired => CLOSE_EXPIRED,
            Self::Invalid(_) => CLOSE_INVALID,
            Self::Missing => CLOSE_MISSING,
        }
    }

    /// Short label used in close frames and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Invalid(_) => "invalid",
            Self::Missing => "missing",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

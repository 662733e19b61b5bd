//! # huddle-auth
//!
//! Verifies the bearer token a client presents when it opens a connection.
//!
//! Tokens are HS256 JWTs carrying a `user_id` claim and an `exp` expiry.
//! Verification is a pure function of the token and the shared secret: no
//! I/O, no retries. Each failure maps to a stable WebSocket close code so
//! clients can tell "get a new token" apart from "give up".

#![deny(unsafe_code)]

pub mod errors;
pub mod signer;
pub mod verifier;

pub use errors::AuthError;
pub use signer::issue_token;
pub use verifier::{Claims, CredentialVerifier, JwtVerifier};

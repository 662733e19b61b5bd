//! Error types for the store.

use huddle_core::{ConversationId, PrincipalId};
use thiserror::Error;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error (includes checkout timeouts).
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// No user with this ID.
    #[error("principal not found: {0}")]
    PrincipalNotFound(PrincipalId),

    /// No conversation with this ID.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// Appending a message failed.
    #[error("write failed: {0}")]
    Write(String),

    /// The blocking worker pool is closed or a worker panicked.
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    /// Stored data could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the error means "the referenced record does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PrincipalNotFound(_) | Self::ConversationNotFound(_)
        )
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Persistence gateway used by connection sessions.
//!
//! [`PersistenceGateway`] is the async seam between the WebSocket layer and
//! storage. [`SqliteGateway`] implements it by running repository calls on the
//! [`BlockingPool`].

use async_trait::async_trait;
use huddle_core::{ConversationId, ConversationRef, Message, Principal, PrincipalId};
use tracing::{debug, warn};

use crate::errors::{Result, StoreError};
use crate::pool::BlockingPool;
use crate::sqlite::repositories::{ConversationRepo, MessageRepo, UserRepo};

/// Principal and conversation lookup plus message append.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Look up a principal by ID.
    async fn resolve_principal(&self, id: PrincipalId) -> Result<Principal>;

    /// Look up several principals, ordered by ID. Unknown IDs are skipped.
    async fn resolve_principals(&self, ids: Vec<PrincipalId>) -> Result<Vec<Principal>>;

    /// Look up a conversation by ID.
    async fn resolve_conversation(&self, id: ConversationId) -> Result<ConversationRef>;

    /// Persist a message and return the stored record, timestamp included.
    ///
    /// Every failure other than a missing record is reported as
    /// [`StoreError::Write`].
    async fn append_message(
        &self,
        conversation: &ConversationRef,
        sender: &Principal,
        content: &str,
    ) -> Result<Message>;
}

/// [`PersistenceGateway`] over the `SQLite` store.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: BlockingPool,
}

impl SqliteGateway {
    /// Create a gateway running on `pool`.
    pub fn new(pool: BlockingPool) -> Self {
        Self { pool }
    }

    /// The blocking pool the gateway runs on.
    pub fn pool(&self) -> &BlockingPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn resolve_principal(&self, id: PrincipalId) -> Result<Principal> {
        self.pool
            .run(move |conn| UserRepo::get(conn, id)?.ok_or(StoreError::PrincipalNotFound(id)))
            .await
    }

    async fn resolve_principals(&self, ids: Vec<PrincipalId>) -> Result<Vec<Principal>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.pool.run(move |conn| UserRepo::get_many(conn, &ids)).await
    }

    async fn resolve_conversation(&self, id: ConversationId) -> Result<ConversationRef> {
        self.pool
            .run(move |conn| {
                ConversationRepo::get(conn, id)?.ok_or(StoreError::ConversationNotFound(id))
            })
            .await
    }

    async fn append_message(
        &self,
        conversation: &ConversationRef,
        sender: &Principal,
        content: &str,
    ) -> Result<Message> {
        let conversation_id = conversation.id;
        let sender_id = sender.id;
        let content = content.to_owned();

        let result = self
            .pool
            .run(move |conn| MessageRepo::append(conn, conversation_id, sender_id, &content))
            .await;

        match result {
            Ok(message) => {
                debug!(
                    conversation_id = %conversation_id,
                    principal_id = %sender_id,
                    message_id = message.id,
                    "message stored"
                );
                Ok(message)
            }
            Err(e) if e.is_not_found() => Err(e),
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    principal_id = %sender_id,
                    error = %e,
                    "message write failed"
                );
                Err(StoreError::Write(e.to_string()))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Domain records exchanged with the persistence gateway.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, PrincipalId};

/// An authenticated identity, serialised to clients as `{"id", "username"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User ID.
    pub id: PrincipalId,
    /// Display name.
    pub username: String,
}

impl Principal {
    /// Build a principal record.
    pub fn new(id: PrincipalId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// Handle to a conversation that exists in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRef {
    /// Conversation ID.
    pub id: ConversationId,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Row ID assigned by the store.
    pub id: i64,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Sender.
    pub sender: PrincipalId,
    /// Text content.
    pub content: String,
    /// Creation time, assigned by the store at write time.
    pub timestamp: DateTime<Utc>,
}

/// Format a timestamp the way every outbound frame carries it
/// (RFC 3339, UTC, millisecond precision).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

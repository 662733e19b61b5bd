//! Wire events: inbound client frames and outbound broadcast frames.
//!
//! Both directions carry a `type` tag. Inbound parsing is deliberately
//! lenient about unknown kinds: a frame whose `type` is not recognised parses
//! to [`InboundFrame::Unknown`] so newer clients never break older servers.
//! Outbound events are a closed enum, matched exhaustively by the session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Principal;
use crate::ids::PrincipalId;

/// Inbound `type` tag for chat messages.
pub const CHAT_MESSAGE: &str = "chat_message";
/// Inbound/outbound `type` tag for typing notifications.
pub const TYPING: &str = "typing";
/// Outbound `type` tag for presence snapshots.
pub const ONLINE_STATUS: &str = "online_status";

/// A recognised inbound client event.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// `{"type":"chat_message","message":..,"user":..}`
    ChatMessage {
        /// Text content.
        message: String,
        /// Claimed sender. Absent means "the authenticated principal".
        #[serde(default)]
        user: Option<PrincipalId>,
    },
    /// `{"type":"typing","receiver":..}`
    Typing {
        /// Intended receiver of the indicator.
        receiver: PrincipalId,
    },
}

/// Result of parsing one inbound text frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// A recognised, well-formed event.
    Event(InboundEvent),
    /// A JSON object whose `type` is not one we handle.
    Unknown(String),
    /// Not JSON, no `type`, or a recognised `type` with bad fields.
    Malformed(String),
}

impl InboundFrame {
    /// Parse a UTF-8 text frame.
    pub fn parse(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Self::Malformed(format!("invalid JSON: {e}")),
        };
        let Some(kind) = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            return Self::Malformed("missing type".into());
        };
        match kind.as_str() {
            CHAT_MESSAGE | TYPING => match serde_json::from_value(value) {
                Ok(event) => Self::Event(event),
                Err(e) => Self::Malformed(format!("invalid {kind} frame: {e}")),
            },
            _ => Self::Unknown(kind),
        }
    }
}

/// An event broadcast to every subscriber of a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A persisted chat message.
    ChatMessage {
        /// Text content.
        message: String,
        /// Sender detail.
        user: Principal,
        /// Store-assigned creation time (ISO-8601).
        timestamp: String,
    },
    /// Someone is typing.
    Typing {
        /// Who is typing.
        user: Principal,
        /// Intended receiver; clients filter on it.
        receiver: PrincipalId,
    },
    /// Current presence snapshot.
    OnlineStatus {
        /// Online principals, ordered by id.
        online_users: Vec<Principal>,
    },
}

impl OutboundEvent {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => CHAT_MESSAGE,
            Self::Typing { .. } => TYPING,
            Self::OnlineStatus { .. } => ONLINE_STATUS,
        }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

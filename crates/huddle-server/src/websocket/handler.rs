//! Inbound frame dispatch: parses a text frame and turns it into at most one
//! bus publish.
//!
//! A chat message is persisted before it is published; nothing is published
//! when the write fails. A typing indicator addressed to its own sender is
//! never published.

use huddle_core::{
    ConversationId, InboundEvent, InboundFrame, OutboundEvent, Principal, PrincipalId, RoomId,
    format_timestamp,
};
use huddle_store::StoreError;
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::metrics::{BUS_PUBLISH_ERRORS_TOTAL, CHAT_FRAMES_DROPPED_TOTAL, CHAT_MESSAGES_TOTAL};
use crate::services::ChatServices;

/// Identity and room of the session a frame arrived on.
#[derive(Clone, Debug)]
pub struct SessionScope {
    /// Authenticated principal.
    pub principal: Principal,
    /// Conversation from the connection URL.
    pub conversation_id: ConversationId,
    /// Room derived from the conversation.
    pub room: RoomId,
}

impl SessionScope {
    /// Scope for `principal` in `conversation_id`.
    pub fn new(principal: Principal, conversation_id: ConversationId) -> Self {
        Self {
            principal,
            conversation_id,
            room: RoomId::for_conversation(conversation_id),
        }
    }
}

/// Why a frame produced no broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Not JSON, no `type`, or bad fields.
    Malformed,
    /// A `type` this server does not handle.
    UnknownType,
    /// Chat frame claiming a sender other than the authenticated principal.
    SenderMismatch,
    /// Sender or conversation no longer exists.
    NotFound,
    /// The message could not be stored.
    WriteFailed,
    /// The bus rejected the event.
    PublishFailed,
}

impl DropReason {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::UnknownType => "unknown_type",
            Self::SenderMismatch => "sender_mismatch",
            Self::NotFound => "not_found",
            Self::WriteFailed => "write_failed",
            Self::PublishFailed => "publish_failed",
        }
    }
}

/// What happened to one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// An event of this kind was published.
    Published(&'static str),
    /// Typing addressed to its own sender.
    Suppressed,
    /// Nothing was published.
    Dropped(DropReason),
}

/// Handle one inbound text frame.
#[instrument(skip_all, fields(room = %scope.room, principal_id = %scope.principal.id))]
pub async fn handle_frame(text: &str, scope: &SessionScope, services: &ChatServices) -> Dispatched {
    let outcome = match InboundFrame::parse(text) {
        InboundFrame::Event(InboundEvent::ChatMessage { message, user }) => {
            handle_chat(message, user, scope, services).await
        }
        InboundFrame::Event(InboundEvent::Typing { receiver }) => {
            handle_typing(receiver, scope, services).await
        }
        InboundFrame::Unknown(kind) => {
            debug!(kind = %kind, "ignoring frame of unknown type");
            Dispatched::Dropped(DropReason::UnknownType)
        }
        InboundFrame::Malformed(reason) => {
            debug!(reason = %reason, "ignoring malformed frame");
            Dispatched::Dropped(DropReason::Malformed)
        }
    };
    if let Dispatched::Dropped(reason) = outcome {
        counter!(CHAT_FRAMES_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
    }
    outcome
}

async fn handle_chat(
    message: String,
    claimed: Option<PrincipalId>,
    scope: &SessionScope,
    services: &ChatServices,
) -> Dispatched {
    let sender_id = claimed.unwrap_or(scope.principal.id);
    if sender_id != scope.principal.id {
        warn!(claimed = %sender_id, "chat frame names another sender, dropped");
        return Dispatched::Dropped(DropReason::SenderMismatch);
    }

    let sender = match services.gateway.resolve_principal(sender_id).await {
        Ok(sender) => sender,
        Err(e) => return store_failure(&e),
    };
    let conversation = match services
        .gateway
        .resolve_conversation(scope.conversation_id)
        .await
    {
        Ok(conversation) => conversation,
        Err(e) => return store_failure(&e),
    };
    let stored = match services
        .gateway
        .append_message(&conversation, &sender, &message)
        .await
    {
        Ok(stored) => stored,
        Err(e) => return store_failure(&e),
    };

    counter!(CHAT_MESSAGES_TOTAL).increment(1);
    let event = OutboundEvent::ChatMessage {
        message: stored.content,
        user: sender,
        timestamp: format_timestamp(&stored.timestamp),
    };
    publish(scope, services, &event).await
}

async fn handle_typing(
    receiver: PrincipalId,
    scope: &SessionScope,
    services: &ChatServices,
) -> Dispatched {
    if receiver == scope.principal.id {
        debug!("typing addressed to self, suppressed");
        return Dispatched::Suppressed;
    }
    let event = OutboundEvent::Typing {
        user: scope.principal.clone(),
        receiver,
    };
    publish(scope, services, &event).await
}

async fn publish(scope: &SessionScope, services: &ChatServices, event: &OutboundEvent) -> Dispatched {
    match services.bus.publish(&scope.room, event).await {
        Ok(()) => Dispatched::Published(event.kind()),
        Err(e) => {
            counter!(BUS_PUBLISH_ERRORS_TOTAL).increment(1);
            warn!(kind = event.kind(), error = %e, "publish failed");
            Dispatched::Dropped(DropReason::PublishFailed)
        }
    }
}

fn store_failure(e: &StoreError) -> Dispatched {
    if e.is_not_found() {
        debug!(error = %e, "chat frame references a missing record, dropped");
        Dispatched::Dropped(DropReason::NotFound)
    } else {
        warn!(error = %e, "chat message not stored, dropped");
        Dispatched::Dropped(DropReason::WriteFailed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

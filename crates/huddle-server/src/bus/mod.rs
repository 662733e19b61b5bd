//! Group membership bus: room-scoped fan-out of outbound events.
//!
//! Subscribers joined to a room at publish time receive the event; nothing
//! published before a join is replayed to the joiner. Events from one
//! publisher reach each subscriber in the order they were published.
//!
//! - [`LocalBus`]: in-process delivery. Correct for a single instance.
//! - [`RelayBus`]: publishes into the shared store's bus log; each process
//!   tails the log and delivers to its own local subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use huddle_core::{OutboundEvent, RoomId, SubscriberId};
use thiserror::Error;

use crate::websocket::connection::ClientConnection;

pub mod local;
pub mod relay;

pub use local::LocalBus;
pub use relay::RelayBus;

/// Errors returned by the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The backing transport is unreachable.
    #[error("bus transport error: {0}")]
    Transport(String),

    /// The event could not be serialized.
    #[error("bus serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Room-scoped publish/subscribe.
#[async_trait]
pub trait MembershipBus: Send + Sync {
    /// Subscribe a connection to a room.
    async fn join(&self, room: &RoomId, subscriber: Arc<ClientConnection>) -> Result<(), BusError>;

    /// Unsubscribe. Leaving a room the subscriber is not in is a no-op.
    async fn leave(&self, room: &RoomId, subscriber: &SubscriberId);

    /// Deliver `event` to every current subscriber of `room`.
    async fn publish(&self, room: &RoomId, event: &OutboundEvent) -> Result<(), BusError>;

    /// Rooms with at least one local subscriber.
    fn room_count(&self) -> usize;
}

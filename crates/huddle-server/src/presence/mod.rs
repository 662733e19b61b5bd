//! Presence registry: who is connected to each room.
//!
//! Presence is a reference count of live sessions per principal per room. A
//! principal appears in a room's snapshot while its count is positive, and a
//! room with no principals left is pruned.

use std::collections::BTreeSet;

use async_trait::async_trait;
use huddle_core::{OutboundEvent, PrincipalId, RoomId};
use huddle_store::{PersistenceGateway, StoreError};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bus::MembershipBus;
use crate::metrics::BUS_PUBLISH_ERRORS_TOTAL;

pub mod memory;
pub mod shared;

pub use memory::MemoryPresence;
pub use shared::SharedPresence;

/// Errors returned by the registry.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The backing store is unreachable.
    #[error("presence transport error: {0}")]
    Transport(String),
}

impl From<StoreError> for PresenceError {
    fn from(e: StoreError) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Outcome of an unregister.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceChange {
    /// The room still has principals; this is the new set.
    Updated(BTreeSet<PrincipalId>),
    /// Nobody is left in the room.
    RoomNowEmpty,
}

/// Per-room reference counts of connected principals.
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Count one more session. Returns the room's set afterwards.
    async fn register(
        &self,
        room: &RoomId,
        principal: PrincipalId,
    ) -> Result<BTreeSet<PrincipalId>, PresenceError>;

    /// Count one fewer session. Unregistering a principal with no sessions
    /// changes nothing and reports the current state.
    async fn unregister(
        &self,
        room: &RoomId,
        principal: PrincipalId,
    ) -> Result<PresenceChange, PresenceError>;

    /// Principals currently online in `room`.
    async fn snapshot(&self, room: &RoomId) -> Result<BTreeSet<PrincipalId>, PresenceError>;
}

/// Publish an `online_status` event with the room's current set.
///
/// The set is read from `presence` here rather than taken from the caller, so
/// a broadcast racing a later join or leave never publishes an older set
/// after a newer one has been written. An empty room publishes nothing.
/// Principals that no longer resolve are left out. Failures are logged; the
/// caller carries on either way.
pub async fn broadcast_online_status(
    room: &RoomId,
    presence: &dyn PresenceRegistry,
    gateway: &dyn PersistenceGateway,
    bus: &dyn MembershipBus,
) {
    let online = match presence.snapshot(room).await {
        Ok(online) if online.is_empty() => return,
        Ok(online) => online,
        Err(e) => {
            warn!(room = %room, error = %e, "presence snapshot failed");
            return;
        }
    };
    let ids: Vec<PrincipalId> = online.into_iter().collect();
    let online_users = match gateway.resolve_principals(ids).await {
        Ok(users) => users,
        Err(e) => {
            warn!(room = %room, error = %e, "failed to resolve online principals");
            return;
        }
    };
    let count = online_users.len();
    let event = OutboundEvent::OnlineStatus { online_users };
    match bus.publish(room, &event).await {
        Ok(()) => debug!(room = %room, online = count, "presence broadcast"),
        Err(e) => {
            counter!(BUS_PUBLISH_ERRORS_TOTAL).increment(1);
            warn!(room = %room, error = %e, "presence broadcast failed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

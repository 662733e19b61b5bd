//! Process-local presence map.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use huddle_core::{PrincipalId, RoomId};

use super::{PresenceChange, PresenceError, PresenceRegistry};

/// Reference counts held in memory. Correct for a single instance only.
///
/// Every mutation goes through the map's entry API, so a room is updated
/// under its shard lock and the returned set is the post-image of that
/// update.
#[derive(Default)]
pub struct MemoryPresence {
    rooms: DashMap<RoomId, HashMap<PrincipalId, usize>>,
}

impl MemoryPresence {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with at least one principal.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Live session count for a principal in a room.
    pub fn sessions(&self, room: &RoomId, principal: PrincipalId) -> usize {
        self.rooms
            .get(room)
            .and_then(|counts| counts.get(&principal).copied())
            .unwrap_or(0)
    }
}

fn keys(counts: &HashMap<PrincipalId, usize>) -> BTreeSet<PrincipalId> {
    counts.keys().copied().collect()
}

#[async_trait]
impl PresenceRegistry for MemoryPresence {
    async fn register(
        &self,
        room: &RoomId,
        principal: PrincipalId,
    ) -> Result<BTreeSet<PrincipalId>, PresenceError> {
        let mut counts = self.rooms.entry(room.clone()).or_default();
        *counts.entry(principal).or_insert(0) += 1;
        Ok(keys(&counts))
    }

    async fn unregister(
        &self,
        room: &RoomId,
        principal: PrincipalId,
    ) -> Result<PresenceChange, PresenceError> {
        match self.rooms.entry(room.clone()) {
            Entry::Vacant(_) => Ok(PresenceChange::RoomNowEmpty),
            Entry::Occupied(mut occupied) => {
                let counts = occupied.get_mut();
                if let Some(n) = counts.get_mut(&principal) {
                    *n -= 1;
                    if *n == 0 {
                        let _ = counts.remove(&principal);
                    }
                }
                if counts.is_empty() {
                    let _ = occupied.remove();
                    Ok(PresenceChange::RoomNowEmpty)
                } else {
                    Ok(PresenceChange::Updated(keys(counts)))
                }
            }
        }
    }

    async fn snapshot(&self, room: &RoomId) -> Result<BTreeSet<PrincipalId>, PresenceError> {
        Ok(self.rooms.get(room).map(|c| keys(&c)).unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

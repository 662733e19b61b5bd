//! Presence registry in the shared store.
//!
//! Rows are attributed to the instance that owns the session, so when a
//! process dies without unregistering, a surviving instance can reap its
//! rows once its lease lapses. Each instance also keeps its own session
//! counts in memory and writes them back if its rows were reaped while the
//! process was still alive.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use huddle_core::{InstanceId, PrincipalId, RoomId, format_timestamp};
use huddle_store::{BlockingPool, HeldPresence, InstanceRepo, PresenceRepo};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{PresenceChange, PresenceError, PresenceRegistry};

/// Sessions this instance holds, keyed by room and principal.
type Held = HashMap<(RoomId, PrincipalId), u32>;

/// Presence backed by the `room_presence` table.
pub struct SharedPresence {
    pool: BlockingPool,
    instance: InstanceId,
    /// Locked around every store write so the rows and the map move together.
    held: Arc<Mutex<Held>>,
}

impl SharedPresence {
    /// Create a registry that owns rows as `instance`.
    pub fn new(pool: BlockingPool, instance: InstanceId) -> Self {
        Self {
            pool,
            instance,
            held: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// This process's instance ID.
    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Refresh this instance's lease.
    ///
    /// If another instance reaped this one after a missed lease, the sessions
    /// still open here are written back. Returns the rooms restored.
    pub async fn heartbeat(&self) -> Result<Vec<RoomId>, PresenceError> {
        let instance = self.instance.clone();
        let held = Arc::clone(&self.held);
        let rooms = self
            .pool
            .run(move |conn| {
                let held = held.lock();
                let rows: Vec<HeldPresence> = held
                    .iter()
                    .map(|((room, principal), sessions)| HeldPresence {
                        room: room.clone(),
                        principal: *principal,
                        sessions: *sessions,
                    })
                    .collect();
                InstanceRepo::heartbeat(conn, &instance, &rows)
            })
            .await?;
        if !rooms.is_empty() {
            warn!(
                instance_id = %self.instance,
                rooms = rooms.len(),
                "lease had lapsed; presence restored"
            );
        }
        Ok(rooms)
    }

    /// Remove rows of other instances whose lease is older than `lease`.
    ///
    /// Returns the rooms that lost rows.
    pub async fn reap_stale(&self, lease: Duration) -> Result<Vec<RoomId>, PresenceError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| PresenceError::Transport(format!("invalid lease: {e}")))?;
        let cutoff = format_timestamp(&(Utc::now() - lease));
        let keep = self.instance.clone();
        let rooms = self
            .pool
            .run(move |conn| InstanceRepo::reap_stale(conn, &cutoff, &keep))
            .await?;
        if !rooms.is_empty() {
            info!(rooms = rooms.len(), "reaped presence of expired instances");
        }
        Ok(rooms)
    }

    /// Drop this instance's lease and every row it owns.
    pub async fn withdraw(&self) -> Result<Vec<RoomId>, PresenceError> {
        let instance = self.instance.clone();
        let held = Arc::clone(&self.held);
        let rooms = self
            .pool
            .run(move |conn| {
                let mut held = held.lock();
                let rooms = InstanceRepo::remove(conn, &instance)?;
                held.clear();
                Ok(rooms)
            })
            .await?;
        debug!(instance_id = %self.instance, rooms = rooms.len(), "instance withdrawn");
        Ok(rooms)
    }
}

#[async_trait]
impl PresenceRegistry for SharedPresence {
    async fn register(
        &self,
        room: &RoomId,
        principal: PrincipalId,
    ) -> Result<BTreeSet<PrincipalId>, PresenceError> {
        let room = room.clone();
        let instance = self.instance.clone();
        let held = Arc::clone(&self.held);
        let online = self
            .pool
            .run(move |conn| {
                let mut held = held.lock();
                let online = PresenceRepo::register(conn, &room, principal, &instance)?;
                *held.entry((room, principal)).or_insert(0) += 1;
                Ok(online)
            })
            .await?;
        Ok(online.into_iter().collect())
    }

    async fn unregister(
        &self,
        room: &RoomId,
        principal: PrincipalId,
    ) -> Result<PresenceChange, PresenceError> {
        let room = room.clone();
        let instance = self.instance.clone();
        let held = Arc::clone(&self.held);
        let online = self
            .pool
            .run(move |conn| {
                let mut held = held.lock();
                let online = PresenceRepo::unregister(conn, &room, principal, &instance)?;
                let key = (room, principal);
                if let Some(sessions) = held.get_mut(&key) {
                    *sessions -= 1;
                    if *sessions == 0 {
                        let _ = held.remove(&key);
                    }
                }
                Ok(online)
            })
            .await?;
        if online.is_empty() {
            Ok(PresenceChange::RoomNowEmpty)
        } else {
            Ok(PresenceChange::Updated(online.into_iter().collect()))
        }
    }

    async fn snapshot(&self, room: &RoomId) -> Result<BTreeSet<PrincipalId>, PresenceError> {
        let room = room.clone();
        let online = self
            .pool
            .run(move |conn| PresenceRepo::snapshot(conn, &room))
            .await?;
        Ok(online.into_iter().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Instance leases.
//!
//! Each running server process heartbeats its row in `instances`. Presence
//! rows owned by an instance whose heartbeat is older than the lease are
//! reaped by whichever live instance notices first.

use huddle_core::{InstanceId, RoomId};
use rusqlite::{Connection, TransactionBehavior, params};

use crate::errors::Result;
use crate::sqlite::now_text;
use crate::sqlite::repositories::presence::{HeldPresence, PresenceRepo, rooms_where};

/// Instance lease repository.
pub struct InstanceRepo;

impl InstanceRepo {
    /// Create or refresh this instance's lease.
    ///
    /// When the lease row is missing (first start, or reaped after a missed
    /// lease) `held` is written back as this instance's presence rows in the
    /// same transaction. Returns the rooms restored that way, ordered by name.
    pub fn heartbeat(
        conn: &mut Connection,
        instance: &InstanceId,
        held: &[HeldPresence],
    ) -> Result<Vec<RoomId>> {
        let now = now_text();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let renewed = tx.execute(
            "UPDATE instances SET heartbeat_at = ?2 WHERE instance_id = ?1",
            params![instance.as_str(), now],
        )?;
        if renewed > 0 {
            tx.commit()?;
            return Ok(Vec::new());
        }
        let _ = tx.execute(
            "INSERT INTO instances (instance_id, started_at, heartbeat_at) VALUES (?1, ?2, ?2)",
            params![instance.as_str(), now],
        )?;
        PresenceRepo::restore(&tx, instance, held)?;
        tx.commit()?;

        let mut rooms: Vec<RoomId> = held.iter().map(|h| h.room.clone()).collect();
        rooms.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        rooms.dedup();
        Ok(rooms)
    }

    /// Drop an instance and every presence row it owns.
    ///
    /// Returns the rooms that lost rows.
    pub fn remove(conn: &mut Connection, instance: &InstanceId) -> Result<Vec<RoomId>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rooms = rooms_where(&tx, "instance_id = ?1", instance.as_str())?;
        let _ = tx.execute(
            "DELETE FROM room_presence WHERE instance_id = ?1",
            params![instance.as_str()],
        )?;
        let _ = tx.execute(
            "DELETE FROM instances WHERE instance_id = ?1",
            params![instance.as_str()],
        )?;
        tx.commit()?;
        Ok(rooms)
    }

    /// Delete presence rows of every instance other than `keep` whose lease
    /// expired before `cutoff` (or which never registered a lease), then the
    /// expired leases themselves.
    ///
    /// Returns the rooms that lost rows.
    pub fn reap_stale(
        conn: &mut Connection,
        cutoff: &str,
        keep: &InstanceId,
    ) -> Result<Vec<RoomId>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let _ = tx.execute(
            "DELETE FROM instances WHERE heartbeat_at < ?1 AND instance_id != ?2",
            params![cutoff, keep.as_str()],
        )?;
        let orphaned = "instance_id != ?1 AND instance_id NOT IN (SELECT instance_id FROM instances)";
        let rooms = rooms_where(&tx, orphaned, keep.as_str())?;
        if !rooms.is_empty() {
            let _ = tx.execute(
                &format!("DELETE FROM room_presence WHERE {orphaned}"),
                params![keep.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(rooms)
    }

    /// Instances with a lease row, ordered by ID.
    #[cfg(test)]
    pub(crate) fn list(conn: &Connection) -> Result<Vec<InstanceId>> {
        let mut stmt = conn.prepare("SELECT instance_id FROM instances ORDER BY instance_id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(InstanceId::from_string))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

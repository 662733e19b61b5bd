//! Shared room presence.
//!
//! One row per `(room, principal, instance)` holding the number of live
//! sessions that instance has for the principal in the room. A principal is
//! online in a room while any row exists for it, whichever instance owns it.

use huddle_core::{InstanceId, PrincipalId, RoomId};
#[cfg(test)]
use rusqlite::OptionalExtension;
use rusqlite::{Connection, TransactionBehavior, params};

use crate::errors::Result;
use crate::sqlite::now_text;

/// Session count one instance holds for a principal in a room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeldPresence {
    /// Room the sessions joined.
    pub room: RoomId,
    /// Principal the sessions belong to.
    pub principal: PrincipalId,
    /// Live sessions, always positive.
    pub sessions: u32,
}

/// Room presence repository.
pub struct PresenceRepo;

impl PresenceRepo {
    /// Count one more session for `principal` in `room` on `instance`.
    ///
    /// Returns the room's principals after the write, read in the same
    /// transaction.
    pub fn register(
        conn: &mut Connection,
        room: &RoomId,
        principal: PrincipalId,
        instance: &InstanceId,
    ) -> Result<Vec<PrincipalId>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let _ = tx.execute(
            "INSERT INTO room_presence (room, principal_id, instance_id, sessions, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT (room, principal_id, instance_id)
             DO UPDATE SET sessions = sessions + 1, updated_at = excluded.updated_at",
            params![room.as_str(), principal.get(), instance.as_str(), now_text()],
        )?;
        let online = Self::snapshot(&tx, room)?;
        tx.commit()?;
        Ok(online)
    }

    /// Count one fewer session. Returns the room's principals after the
    /// write; an empty list means the room has nobody left on any instance.
    ///
    /// Unregistering a principal with no sessions changes nothing.
    pub fn unregister(
        conn: &mut Connection,
        room: &RoomId,
        principal: PrincipalId,
        instance: &InstanceId,
    ) -> Result<Vec<PrincipalId>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let decremented = tx.execute(
            "UPDATE room_presence SET sessions = sessions - 1, updated_at = ?4
             WHERE room = ?1 AND principal_id = ?2 AND instance_id = ?3 AND sessions > 1",
            params![room.as_str(), principal.get(), instance.as_str(), now_text()],
        )?;
        if decremented == 0 {
            let _ = tx.execute(
                "DELETE FROM room_presence
                 WHERE room = ?1 AND principal_id = ?2 AND instance_id = ?3",
                params![room.as_str(), principal.get(), instance.as_str()],
            )?;
        }
        let online = Self::snapshot(&tx, room)?;
        tx.commit()?;
        Ok(online)
    }

    /// Write `held` back as `instance`'s rows, replacing any stored counts.
    pub(crate) fn restore(
        conn: &Connection,
        instance: &InstanceId,
        held: &[HeldPresence],
    ) -> Result<()> {
        let now = now_text();
        let mut stmt = conn.prepare(
            "INSERT INTO room_presence (room, principal_id, instance_id, sessions, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (room, principal_id, instance_id)
             DO UPDATE SET sessions = excluded.sessions, updated_at = excluded.updated_at",
        )?;
        for row in held {
            let _ = stmt.execute(params![
                row.room.as_str(),
                row.principal.get(),
                instance.as_str(),
                row.sessions,
                now
            ])?;
        }
        Ok(())
    }

    /// Distinct principals online in `room`, ordered by ID.
    pub fn snapshot(conn: &Connection, room: &RoomId) -> Result<Vec<PrincipalId>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT principal_id FROM room_presence
             WHERE room = ?1 ORDER BY principal_id",
        )?;
        let rows = stmt
            .query_map(params![room.as_str()], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(PrincipalId::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Session count one instance holds for a principal in a room.
    #[cfg(test)]
    pub(crate) fn sessions(
        conn: &Connection,
        room: &RoomId,
        principal: PrincipalId,
        instance: &InstanceId,
    ) -> Result<u32> {
        let count: Option<u32> = conn
            .query_row(
                "SELECT sessions FROM room_presence
                 WHERE room = ?1 AND principal_id = ?2 AND instance_id = ?3",
                params![room.as_str(), principal.get(), instance.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }
}

/// Rooms that currently hold rows matching `filter` (a `WHERE` fragment over
/// `instance_id` bound to `?1`), ordered by name.
pub(crate) fn rooms_where(
    conn: &Connection,
    filter: &str,
    arg: &str,
) -> Result<Vec<RoomId>> {
    let sql = format!("SELECT DISTINCT room FROM room_presence WHERE {filter} ORDER BY room");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![arg], |row| row.get::<_, String>(0))?
        .map(|r| r.map(RoomId::from_raw))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

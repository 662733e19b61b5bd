//! Append-only bus event log.
//!
//! Publishers append; every instance's relay tails rows past its cursor.
//! `seq` is `AUTOINCREMENT`, so it is strictly increasing and never reused
//! even after trimming.

use huddle_core::{InstanceId, RoomId};
use rusqlite::{Connection, params};

use crate::errors::Result;
use crate::sqlite::now_text;

/// One published event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusRecord {
    /// Log position.
    pub seq: i64,
    /// Target room.
    pub room: RoomId,
    /// Instance that published the event.
    pub origin: InstanceId,
    /// Serialized outbound frame.
    pub payload: String,
}

/// Bus log repository.
pub struct BusLogRepo;

impl BusLogRepo {
    /// Append an event and return its sequence number.
    pub fn append(
        conn: &Connection,
        room: &RoomId,
        origin: &InstanceId,
        payload: &str,
    ) -> Result<i64> {
        let _ = conn.execute(
            "INSERT INTO bus_events (room, origin_instance, payload, published_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![room.as_str(), origin.as_str(), payload, now_text()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Highest sequence number ever assigned (0 for an empty log).
    pub fn max_seq(conn: &Connection) -> Result<i64> {
        // sqlite_sequence survives trimming; fall back to the table itself.
        let seq: i64 = conn.query_row(
            "SELECT MAX(
                 COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'bus_events'), 0),
                 COALESCE((SELECT MAX(seq) FROM bus_events), 0)
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    /// Up to `limit` records with `seq > after`, in order.
    pub fn read_after(conn: &Connection, after: i64, limit: u32) -> Result<Vec<BusRecord>> {
        let mut stmt = conn.prepare_cached(
            "SELECT seq, room, origin_instance, payload FROM bus_events
             WHERE seq > ?1 ORDER BY seq LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![after, limit], |row| {
                Ok(BusRecord {
                    seq: row.get(0)?,
                    room: RoomId::from_raw(row.get(1)?),
                    origin: InstanceId::from_string(row.get(2)?),
                    payload: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete records published before `cutoff`. Returns the count removed.
    pub fn trim_before(conn: &Connection, cutoff: &str) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM bus_events WHERE published_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::test_support::setup;
    use huddle_core::ConversationId;

    fn room() -> RoomId {
        RoomId::for_conversation(ConversationId::new(1))
    }

    #[test]
    fn empty_log_has_zero_max() {
        let conn = setup();
        assert_eq!(BusLogRepo::max_seq(&conn).unwrap(), 0);
        assert!(BusLogRepo::read_after(&conn, 0, 10).unwrap().is_empty());
    }

    #[test]
    fn append_assigns_increasing_seq() {
        let conn = setup();
        let origin = InstanceId::from("i-1");
        let a = BusLogRepo::append(&conn, &room(), &origin, "a").unwrap();
        let b = BusLogRepo::append(&conn, &room(), &origin, "b").unwrap();
        assert!(b > a);
        assert_eq!(BusLogRepo::max_seq(&conn).unwrap(), b);
    }

    #[test]
    fn read_after_respects_cursor_and_limit() {
        let conn = setup();
        let origin = InstanceId::from("i-1");
        let first = BusLogRepo::append(&conn, &room(), &origin, "1").unwrap();
        let _ = BusLogRepo::append(&conn, &room(), &origin, "2").unwrap();
        let _ = BusLogRepo::append(&conn, &room(), &origin, "3").unwrap();

        let page = BusLogRepo::read_after(&conn, first, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].payload, "2");
        assert_eq!(page[0].origin, origin);
        assert_eq!(page[0].room, room());

        let rest = BusLogRepo::read_after(&conn, page[0].seq, 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload, "3");
    }

    #[test]
    fn trim_keeps_max_seq() {
        let conn = setup();
        let origin = InstanceId::from("i-1");
        let last = BusLogRepo::append(&conn, &room(), &origin, "x").unwrap();
        let removed = BusLogRepo::trim_before(&conn, "2999-01-01T00:00:00.000Z").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(BusLogRepo::max_seq(&conn).unwrap(), last);

        let next = BusLogRepo::append(&conn, &room(), &origin, "y").unwrap();
        assert!(next > last);
    }
}

//! User repository: lookups for the `users` table.

use huddle_core::{Principal, PrincipalId};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::errors::Result;
use crate::sqlite::now_text;

/// User repository.
pub struct UserRepo;

impl UserRepo {
    /// Insert a user and return it.
    pub fn create(conn: &Connection, username: &str) -> Result<Principal> {
        let _ = conn.execute(
            "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
            params![username, now_text()],
        )?;
        Ok(Principal::new(
            PrincipalId::new(conn.last_insert_rowid()),
            username,
        ))
    }

    /// Look up one user.
    pub fn get(conn: &Connection, id: PrincipalId) -> Result<Option<Principal>> {
        let row = conn
            .query_row(
                "SELECT id, username FROM users WHERE id = ?1",
                params![id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Look up several users, ordered by ID. Unknown IDs are skipped.
    pub fn get_many(conn: &Connection, ids: &[PrincipalId]) -> Result<Vec<Principal>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT id, username FROM users WHERE id IN ({placeholders}) ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter().map(|id| id.get())), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Principal> {
        Ok(Principal {
            id: PrincipalId::new(row.get(0)?),
            username: row.get(1)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

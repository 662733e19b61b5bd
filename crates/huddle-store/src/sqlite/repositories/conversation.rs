//! Conversation repository.

use huddle_core::{ConversationId, ConversationRef, PrincipalId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::now_text;
use crate::sqlite::repositories::parse_ts;

/// Conversation repository.
pub struct ConversationRepo;

impl ConversationRepo {
    /// Create a conversation with the given participants.
    pub fn create(conn: &Connection, participants: &[PrincipalId]) -> Result<ConversationRef> {
        let tx = conn.unchecked_transaction()?;
        let now = now_text();
        let _ = tx.execute(
            "INSERT INTO conversations (created_at) VALUES (?1)",
            params![now],
        )?;
        let id = ConversationId::new(tx.last_insert_rowid());
        for user in participants {
            let _ = tx.execute(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id)
                 VALUES (?1, ?2)",
                params![id.get(), user.get()],
            )?;
        }
        tx.commit()?;
        Ok(ConversationRef {
            id,
            created_at: parse_ts(&now)?,
        })
    }

    /// Look up a conversation.
    pub fn get(conn: &Connection, id: ConversationId) -> Result<Option<ConversationRef>> {
        let created_at: Option<String> = conn
            .query_row(
                "SELECT created_at FROM conversations WHERE id = ?1",
                params![id.get()],
                |row| row.get(0),
            )
            .optional()?;
        created_at
            .map(|raw| {
                Ok(ConversationRef {
                    id,
                    created_at: parse_ts(&raw)?,
                })
            })
            .transpose()
    }

    /// Participants of a conversation, ordered by ID.
    pub fn participants(conn: &Connection, id: ConversationId) -> Result<Vec<PrincipalId>> {
        let mut stmt = conn.prepare(
            "SELECT user_id FROM conversation_participants
             WHERE conversation_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt
            .query_map(params![id.get()], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(PrincipalId::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Message repository.

use chrono::{DateTime, Utc};
use huddle_core::{ConversationId, Message, PrincipalId, format_timestamp};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::errors::Result;
use crate::sqlite::repositories::parse_ts;

/// Message repository.
pub struct MessageRepo;

impl MessageRepo {
    /// Append a message and return the stored record.
    ///
    /// The timestamp is assigned here and never goes backwards within a
    /// conversation: if the clock reads earlier than the newest stored
    /// message, the newest timestamp is reused.
    pub fn append(
        conn: &mut Connection,
        conversation: ConversationId,
        sender: PrincipalId,
        content: &str,
    ) -> Result<Message> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last: Option<String> = tx
            .query_row(
                "SELECT MAX(timestamp) FROM messages WHERE conversation_id = ?1",
                params![conversation.get()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let now = Utc::now();
        let timestamp = match last {
            Some(raw) => now.max(parse_ts(&raw)?),
            None => now,
        };

        let _ = tx.execute(
            "INSERT INTO messages (conversation_id, sender_id, content, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.get(),
                sender.get(),
                content,
                format_timestamp(&timestamp)
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Message {
            id,
            conversation_id: conversation,
            sender,
            content: content.to_owned(),
            timestamp: truncate_to_millis(timestamp),
        })
    }

    /// The newest `limit` messages of a conversation, oldest first.
    pub fn recent(conn: &Connection, conversation: ConversationId, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, content, timestamp FROM (
                 SELECT id, sender_id, content, timestamp FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2
             ) ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![conversation.get(), limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, sender, content, ts)| {
                Ok(Message {
                    id,
                    conversation_id: conversation,
                    sender: PrincipalId::new(sender),
                    content,
                    timestamp: parse_ts(&ts)?,
                })
            })
            .collect()
    }
}

/// Stored timestamps carry millisecond precision; keep the returned record
/// identical to what a later read would produce.
fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

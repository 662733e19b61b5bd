//! Stateless repositories, one per table group.
//!
//! Every method takes a connection; methods that must read and write
//! atomically take `&mut Connection` and open an `IMMEDIATE` transaction so
//! concurrent writers from any process are serialised by `SQLite` itself.

mod bus_log;
mod conversation;
mod instance;
mod message;
mod presence;
mod user;

pub use bus_log::{BusLogRepo, BusRecord};
pub use conversation::ConversationRepo;
pub use instance::InstanceRepo;
pub use message::MessageRepo;
pub use presence::{HeldPresence, PresenceRepo};
pub use user::UserRepo;

use chrono::{DateTime, Utc};

use crate::errors::{Result, StoreError};

/// Parse a stored timestamp column.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

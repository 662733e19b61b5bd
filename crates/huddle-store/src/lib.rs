//! # huddle-store
//!
//! Everything Huddle keeps in `SQLite`:
//!
//! - **Persistence gateway**: principal and conversation lookup, message
//!   append ([`PersistenceGateway`], [`SqliteGateway`])
//! - **Shared presence table**: per-instance session counts per room, so every
//!   process sees the same online set ([`PresenceRepo`])
//! - **Bus log**: append-only event log tailed by each instance's relay
//!   ([`BusLogRepo`])
//! - **Blocking pool**: the only place `rusqlite` calls run, off the async
//!   scheduler ([`BlockingPool`])

#![deny(unsafe_code)]

pub mod errors;
pub mod gateway;
pub mod pool;
pub mod sqlite;

pub use errors::{Result, StoreError};
pub use gateway::{PersistenceGateway, SqliteGateway};
pub use pool::BlockingPool;
pub use sqlite::repositories::{
    BusLogRepo, BusRecord, ConversationRepo, HeldPresence, InstanceRepo, MessageRepo,
    PresenceRepo, UserRepo,
};
pub use sqlite::{ConnectionConfig, ConnectionPool, new_file, new_in_memory, run_migrations};

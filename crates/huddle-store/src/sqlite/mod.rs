//! `SQLite` backend.
//!
//! - **[`connection`]**: `r2d2` connection pool with WAL mode and pragmas
//!   applied to every connection.
//! - **[`migrations`]**: Version-tracked schema evolution, embedded at compile
//!   time and run transactionally.
//! - **[`repositories`]**: Stateless repository structs. Each method takes a
//!   connection and executes SQL; no shared mutable state.

pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
pub use migrations::{current_version, latest_version, run_migrations};

/// Current time in the fixed-width text form stored in every timestamp
/// column. The format sorts lexicographically in time order.
pub(crate) fn now_text() -> String {
    huddle_core::format_timestamp(&chrono::Utc::now())
}

//! # huddle-server
//!
//! Axum HTTP + `WebSocket` chat server.
//!
//! - `WebSocket` sessions: token check, room join, frame dispatch, teardown
//! - Group membership bus: in-process fan-out, or a relay over the shared
//!   store so several server processes serve one room
//! - Presence registry: per-room reference counts of connected principals
//! - HTTP endpoints: health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod bus;
pub mod cluster;
pub mod config;
pub mod health;
pub mod metrics;
pub mod presence;
pub mod server;
pub mod services;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;

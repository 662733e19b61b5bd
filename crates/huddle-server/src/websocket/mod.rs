//! `WebSocket` handling: per-client connection, frame dispatch, session lifecycle.

pub mod connection;
pub mod handler;
pub mod session;

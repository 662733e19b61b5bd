//! Server configuration.

use std::time::Duration;

use huddle_settings::{ClusterMode, HuddleSettings};
use serde::{Deserialize, Serialize};

/// Runtime configuration for the chat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent `WebSocket` connections.
    pub max_connections: usize,
    /// Interval between server Ping frames, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Disconnect a client silent for longer than this, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_queue: usize,
    /// Single process or shared-store cluster.
    pub mode: ClusterMode,
    /// Relay poll interval, in milliseconds.
    pub relay_poll_ms: u64,
    /// How long bus log rows are kept, in seconds.
    pub bus_retention_secs: u64,
    /// Instance lease refresh interval, in milliseconds.
    pub instance_heartbeat_ms: u64,
    /// Instances silent for longer than this lose their presence rows.
    pub presence_lease_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 64 * 1024,
            outbound_queue: 256,
            mode: ClusterMode::Local,
            relay_poll_ms: 50,
            bus_retention_secs: 300,
            instance_heartbeat_ms: 5_000,
            presence_lease_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &HuddleSettings) -> Self {
        let server = &settings.server;
        let cluster = &settings.cluster;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            heartbeat_interval_ms: server.heartbeat_interval_ms,
            heartbeat_timeout_ms: server.heartbeat_timeout_ms,
            max_message_size: server.max_message_size,
            outbound_queue: server.outbound_queue,
            mode: cluster.mode,
            relay_poll_ms: cluster.relay_poll_ms,
            bus_retention_secs: cluster.bus_retention_secs,
            instance_heartbeat_ms: cluster.instance_heartbeat_ms,
            presence_lease_secs: cluster.presence_lease_secs,
        }
    }

    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence allowed before disconnect.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Relay poll interval.
    pub fn relay_poll(&self) -> Duration {
        Duration::from_millis(self.relay_poll_ms)
    }

    /// Bus log retention.
    pub fn bus_retention(&self) -> Duration {
        Duration::from_secs(self.bus_retention_secs)
    }

    /// Instance lease refresh interval.
    pub fn instance_heartbeat(&self) -> Duration {
        Duration::from_millis(self.instance_heartbeat_ms)
    }

    /// Instance lease length.
    pub fn presence_lease(&self) -> Duration {
        Duration::from_secs(self.presence_lease_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

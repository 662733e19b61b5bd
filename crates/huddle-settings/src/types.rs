//! Settings schema.
//!
//! Every struct uses `#[serde(default)]` so a settings file only needs the
//! keys it overrides. Keys are camelCase on disk.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuddleSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Token verification.
    pub auth: AuthSettings,
    /// `SQLite` store.
    pub store: StoreSettings,
    /// Multi-instance coordination.
    pub cluster: ClusterSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener and per-connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server pings, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Disconnect a client silent for longer than this, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before drops start.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 64 * 1024,
            outbound_queue: 256,
        }
    }
}

/// Token verification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 shared secret.
    pub jwt_secret: String,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            leeway_secs: 0,
        }
    }
}

/// `SQLite` store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database file (relative paths resolve against `~/.huddle`).
    pub db_path: String,
    /// Connection pool size; also bounds the blocking worker pool.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "huddle.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Where presence and fan-out state lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMode {
    /// Process-local bus and presence map. Correct for a single instance only.
    #[default]
    Local,
    /// Bus log and presence table in the shared store, so several instances
    /// can serve the same rooms.
    Shared,
}

/// Multi-instance coordination settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSettings {
    /// Local or shared mode.
    pub mode: ClusterMode,
    /// How often the relay tails the bus log, in milliseconds.
    pub relay_poll_ms: u64,
    /// How long bus log rows are kept, in seconds.
    pub bus_retention_secs: u64,
    /// How often this instance refreshes its heartbeat row, in milliseconds.
    pub instance_heartbeat_ms: u64,
    /// Presence rows of instances silent for longer than this are reaped,
    /// in seconds.
    pub presence_lease_secs: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            mode: ClusterMode::Local,
            relay_poll_ms: 50,
            bus_retention_secs: 300,
            instance_heartbeat_ms: 5_000,
            presence_lease_secs: 30,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` wins when set).
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

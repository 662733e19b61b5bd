//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HuddleSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `HUDDLE_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ClusterMode, HuddleSettings};

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "HUDDLE_SETTINGS";

/// Resolve the Huddle home directory (`~/.huddle`).
pub fn huddle_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".huddle")
}

/// Resolve the settings file: `$HUDDLE_SETTINGS`, else `~/.huddle/settings.json`.
pub fn settings_path() -> PathBuf {
    read_env_string(SETTINGS_PATH_ENV)
        .map_or_else(|| huddle_dir().join("settings.json"), PathBuf::from)
}

/// Resolve the configured database path against the Huddle home directory.
///
/// Absolute paths and the special `:memory:` value are returned unchanged.
pub fn resolve_db_path(settings: &HuddleSettings) -> PathBuf {
    let raw = Path::new(&settings.store.db_path);
    if raw.is_absolute() || settings.store.db_path == ":memory:" {
        raw.to_path_buf()
    } else {
        huddle_dir().join(raw)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HuddleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<HuddleSettings> {
    let defaults = serde_json::to_value(HuddleSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HuddleSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

// Bounds shared by the env parsers and `validate`.
const HEARTBEAT_INTERVAL_MS: (u64, u64) = (1000, 600_000);
const HEARTBEAT_TIMEOUT_MS: (u64, u64) = (1000, 3_600_000);
const RELAY_POLL_MS: (u64, u64) = (5, 60_000);
const INSTANCE_HEARTBEAT_MS: (u64, u64) = (100, 600_000);

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut HuddleSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("HUDDLE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("HUDDLE_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("HUDDLE_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_u64(
        "HUDDLE_HEARTBEAT_INTERVAL_MS",
        HEARTBEAT_INTERVAL_MS.0,
        HEARTBEAT_INTERVAL_MS.1,
    ) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64(
        "HUDDLE_HEARTBEAT_TIMEOUT_MS",
        HEARTBEAT_TIMEOUT_MS.0,
        HEARTBEAT_TIMEOUT_MS.1,
    ) {
        settings.server.heartbeat_timeout_ms = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("HUDDLE_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = read_env_string("HUDDLE_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = read_env_usize("HUDDLE_POOL_SIZE", 1, 256) {
        settings.store.pool_size = u32::try_from(v).unwrap_or(u32::MAX);
    }

    // ── Cluster ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("HUDDLE_CLUSTER_MODE") {
        match parse_cluster_mode(&v) {
            Some(mode) => settings.cluster.mode = mode,
            None => tracing::warn!(key = "HUDDLE_CLUSTER_MODE", value = %v, "invalid cluster mode, ignoring"),
        }
    }
    if let Some(v) = read_env_u64("HUDDLE_RELAY_POLL_MS", RELAY_POLL_MS.0, RELAY_POLL_MS.1) {
        settings.cluster.relay_poll_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("HUDDLE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("HUDDLE_LOG_JSON") {
        settings.logging.json = v;
    }
}

fn check_range(key: &str, value: u64, (min, max): (u64, u64)) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{key} must be between {min} and {max}, got {value}"
        )))
    }
}

/// Check interval bounds and constraints that span fields.
pub fn validate(settings: &HuddleSettings) -> Result<()> {
    check_range(
        "server.heartbeatIntervalMs",
        settings.server.heartbeat_interval_ms,
        HEARTBEAT_INTERVAL_MS,
    )?;
    check_range(
        "server.heartbeatTimeoutMs",
        settings.server.heartbeat_timeout_ms,
        HEARTBEAT_TIMEOUT_MS,
    )?;
    check_range(
        "cluster.relayPollMs",
        settings.cluster.relay_poll_ms,
        RELAY_POLL_MS,
    )?;
    check_range(
        "cluster.instanceHeartbeatMs",
        settings.cluster.instance_heartbeat_ms,
        INSTANCE_HEARTBEAT_MS,
    )?;
    if settings.cluster.presence_lease_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "cluster.presenceLeaseSecs must be at least 1".into(),
        ));
    }
    if settings.store.pool_size == 0 {
        return Err(SettingsError::InvalidValue(
            "store.poolSize must be at least 1".into(),
        ));
    }
    if settings.server.outbound_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "server.outboundQueue must be at least 1".into(),
        ));
    }
    if settings.server.heartbeat_timeout_ms < settings.server.heartbeat_interval_ms {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatTimeoutMs must not be shorter than heartbeatIntervalMs".into(),
        ));
    }
    if settings.cluster.mode == ClusterMode::Shared
        && settings.cluster.presence_lease_secs * 1000 <= settings.cluster.instance_heartbeat_ms
    {
        return Err(SettingsError::InvalidValue(
            "cluster.presenceLeaseSecs must outlast instanceHeartbeatMs".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a cluster mode name (case-insensitive).
pub fn parse_cluster_mode(val: &str) -> Option<ClusterMode> {
    match val.to_lowercase().as_str() {
        "local" => Some(ClusterMode::Local),
        "shared" => Some(ClusterMode::Shared),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 8000, "host": "localhost"}
        });
        let source = serde_json::json!({
            "server": {"port": 9090}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_settings_from_path(path).unwrap();
        assert_eq!(settings.server.port, HuddleSettings::default().server.port);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"outboundQueue": 16}, "cluster": {"mode": "shared", "relayPollMs": 20}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.outbound_queue, 16);
        assert_eq!(settings.cluster.mode, ClusterMode::Shared);
        assert_eq!(settings.cluster.relay_poll_ms, 20);
        assert_eq!(settings.cluster.presence_lease_secs, 30);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_zero_pool_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"store": {"poolSize": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    // ── validate ────────────────────────────────────────────────────

    #[test]
    fn validate_rejects_timeout_shorter_than_interval() {
        let mut settings = HuddleSettings::default();
        settings.server.heartbeat_timeout_ms = 1_000;
        settings.server.heartbeat_interval_ms = 5_000;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn validate_rejects_lease_shorter_than_heartbeat_in_shared_mode() {
        let mut settings = HuddleSettings::default();
        settings.cluster.mode = ClusterMode::Shared;
        settings.cluster.presence_lease_secs = 1;
        settings.cluster.instance_heartbeat_ms = 5_000;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let cases: [fn(&mut HuddleSettings); 5] = [
            |s| s.server.heartbeat_interval_ms = 0,
            |s| s.server.heartbeat_timeout_ms = 0,
            |s| s.cluster.relay_poll_ms = 0,
            |s| s.cluster.instance_heartbeat_ms = 0,
            |s| s.cluster.presence_lease_secs = 0,
        ];
        for apply in cases {
            let mut settings = HuddleSettings::default();
            settings.cluster.mode = ClusterMode::Shared;
            apply(&mut settings);
            assert!(matches!(
                validate(&settings),
                Err(SettingsError::InvalidValue(_))
            ));
        }
    }

    #[test]
    fn validate_uses_env_bounds() {
        let mut settings = HuddleSettings::default();
        settings.cluster.relay_poll_ms = 4;
        assert!(validate(&settings).is_err());
        settings.cluster.relay_poll_ms = 5;
        assert!(validate(&settings).is_ok());
        settings.server.heartbeat_interval_ms = 999;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn file_with_zero_relay_poll_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"cluster": {"mode": "shared", "relayPollMs": 0}}"#,
        )
        .unwrap();

        let err = load_settings_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("cluster.relayPollMs"), "{err}");
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(validate(&HuddleSettings::default()).is_ok());
    }

    // ── resolve_db_path ─────────────────────────────────────────────

    #[test]
    fn absolute_db_path_is_unchanged() {
        let mut settings = HuddleSettings::default();
        settings.store.db_path = "/var/lib/huddle/chat.db".into();
        assert_eq!(
            resolve_db_path(&settings),
            PathBuf::from("/var/lib/huddle/chat.db")
        );
    }

    #[test]
    fn relative_db_path_lands_in_huddle_dir() {
        let settings = HuddleSettings::default();
        assert!(resolve_db_path(&settings).ends_with(".huddle/huddle.db"));
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_cluster_mode_variants() {
        assert_eq!(parse_cluster_mode("local"), Some(ClusterMode::Local));
        assert_eq!(parse_cluster_mode("SHARED"), Some(ClusterMode::Shared));
        assert_eq!(parse_cluster_mode("redis"), None);
    }

    #[test]
    fn parse_u16_range_bounds() {
        assert_eq!(parse_u16_range("0", 0, 65535), Some(0));
        assert_eq!(parse_u16_range("99999", 0, 65535), None);
        assert_eq!(parse_u16_range("abc", 0, 65535), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("30000", 1000, 600_000), Some(30_000));
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
    }

    #[test]
    fn parse_usize_range_bounds() {
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("0", 1, 10_000), None);
    }
}

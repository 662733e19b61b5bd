//! # huddle-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HuddleSettings::default()`]
//! 2. **Settings file**: `$HUDDLE_SETTINGS` or `~/.huddle/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `HUDDLE_*` overrides (highest priority)
//!
//! Command-line flags in the `huddle` binary are applied on top of the
//! loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, huddle_dir, load_settings, load_settings_from_path, resolve_db_path,
    settings_path,
};
pub use types::*;

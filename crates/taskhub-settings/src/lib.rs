//! # taskhub-settings
//!
//! Configuration for the taskhub notification server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TaskhubSettings::default()`]
//! 2. **Settings file**: `~/.taskhub/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TASKHUB_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, resolve_db_path,
    settings_path, taskhub_home,
};
pub use types::*;

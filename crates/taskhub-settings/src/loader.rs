//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TaskhubSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TASKHUB_*` environment overrides (highest priority)
//! 4. [`TaskhubSettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TaskhubSettings;

/// The taskhub data directory (`~/.taskhub`).
pub fn taskhub_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".taskhub")
}

/// Resolve the path to the settings file (`~/.taskhub/settings.json`).
pub fn settings_path() -> PathBuf {
    taskhub_home().join("settings.json")
}

/// Resolve a possibly relative database path against [`taskhub_home`].
pub fn resolve_db_path(path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() { p } else { taskhub_home().join(p) }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TaskhubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or values fail.
pub fn load_settings_from_path(path: &Path) -> Result<TaskhubSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides or
/// validation.
pub fn read_settings_file(path: &Path) -> Result<TaskhubSettings> {
    let defaults = serde_json::to_value(TaskhubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `TASKHUB_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TaskhubSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `TASKHUB_*` overrides from an arbitrary variable lookup.
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept.
pub fn apply_overrides_from<F>(settings: &mut TaskhubSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TASKHUB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("TASKHUB_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("TASKHUB_DB_PATH") {
        settings.database.path = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TASKHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TASKHUB_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = env.usize("TASKHUB_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.hub.queue_capacity = v;
    }
    if let Some(v) = env.u64("TASKHUB_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.hub.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("TASKHUB_HEARTBEAT_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.hub.heartbeat_timeout_ms = v;
    }

    // ── Publisher ───────────────────────────────────────────────────
    if let Some(v) = env.u64("TASKHUB_MAX_ATTEMPTS", 1, 20) {
        // Range-checked above
        #[allow(clippy::cast_possible_truncation)]
        let attempts = v as u32;
        settings.publisher.max_attempts = attempts;
    }
    if let Some(v) = env.u64("TASKHUB_CHAIN_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.publisher.chain_timeout_ms = v;
    }

    // ── Scheduler ───────────────────────────────────────────────────
    if let Some(v) = env.bool("TASKHUB_SCHEDULER_ENABLED") {
        settings.scheduler.enabled = v;
    }
    if let Some(v) = env.u64("TASKHUB_TICK_INTERVAL_MS", 1_000, 86_400_000) {
        settings.scheduler.tick_interval_ms = v;
    }
    if let Some(v) = env.u64("TASKHUB_DUE_SOON_WINDOW_MS", 60_000, 2_592_000_000) {
        settings.scheduler.due_soon_window_ms = v;
    }
    if let Some(v) = env.u64("TASKHUB_OVERDUE_GRACE_MS", 0, 2_592_000_000) {
        settings.scheduler.overdue_grace_ms = v;
    }

    // ── Webhook ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TASKHUB_WEBHOOK_URL") {
        settings.webhook.url = Some(v);
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

//! Settings loading with deep merge, environment overrides and validation.
//!
//! Loading flow:
//! 1. Start with compiled [`FluxSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{FluxSettings, LogFormat};

/// Resolve the default settings file path (`~/.flux/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".flux").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FluxSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// [`validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FluxSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<FluxSettings> {
    let defaults = serde_json::to_value(FluxSettings::default()).map_err(SettingsError::Defaults)?;
    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
        return serde_json::from_value(defaults).map_err(SettingsError::Defaults);
    }

    debug!(?path, "loading settings from file");
    let parse_err = |source: serde_json::Error| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let user: Value = serde_json::from_str(&content).map_err(parse_err)?;
    serde_json::from_value(deep_merge(defaults, user)).map_err(parse_err)
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut FluxSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are warned about and ignored (file/default wins)
pub fn apply_overrides(settings: &mut FluxSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("FLUX_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("FLUX_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("FLUX_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("FLUX_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64("FLUX_HEARTBEAT_TIMEOUT_SECS", 1, 7200) {
        settings.server.heartbeat_timeout_secs = v;
    }

    // ── AMQP ────────────────────────────────────────────────────────
    if let Some(v) = env.string("AMQP_URL") {
        settings.amqp.url = v;
    }
    if let Some(v) = env.string("FLUX_EXCHANGE") {
        settings.amqp.exchange = v;
    }
    if let Some(v) = env.string("FLUX_QUEUE") {
        settings.amqp.queue = Some(v);
    }
    if let Some(v) = env.u16("FLUX_PREFETCH", 1, 65535) {
        settings.amqp.prefetch = v;
    }
    if let Some(v) = env.u16("FLUX_AMQP_HEARTBEAT_SECS", 0, 3600) {
        settings.amqp.heartbeat_secs = v;
    }

    // ── Logging / auth ──────────────────────────────────────────────
    if let Some(v) = env.string("FLUX_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("FLUX_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "FLUX_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }
    if let Some(v) = env.bool("FLUX_TRUST_PROXY_HEADERS") {
        settings.auth.trust_proxy_headers = v;
    }
}

/// Reject settings that would make the relay misbehave.
pub fn validate(settings: &FluxSettings) -> Result<()> {
    let server = &settings.server;
    if server.heartbeat_interval_secs == 0 {
        return invalid("server.heartbeatIntervalSecs", "must be at least 1");
    }
    if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
        return invalid(
            "server.heartbeatTimeoutSecs",
            format!(
                "{}s is shorter than server.heartbeatIntervalSecs ({}s)",
                server.heartbeat_timeout_secs, server.heartbeat_interval_secs
            ),
        );
    }
    if server.max_connections == 0 {
        return invalid("server.maxConnections", "must be at least 1");
    }
    if server.send_queue_capacity == 0 {
        return invalid("server.sendQueueCapacity", "must be at least 1");
    }

    let amqp = &settings.amqp;
    if amqp.url.is_empty() {
        return invalid("amqp.url", "must not be empty");
    }
    if amqp.exchange.is_empty() {
        return invalid("amqp.exchange", "must not be empty");
    }
    if amqp.prefetch == 0 {
        return invalid("amqp.prefetch", "must be at least 1");
    }

    let sup = &settings.supervisor;
    if sup.base_delay_ms == 0 {
        return invalid("supervisor.baseDelayMs", "must be at least 1");
    }
    if sup.max_delay_ms < sup.base_delay_ms {
        return invalid(
            "supervisor.maxDelayMs",
            format!("{} is below supervisor.baseDelayMs ({})", sup.max_delay_ms, sup.base_delay_ms),
        );
    }
    Ok(())
}

fn invalid(key: &'static str, reason: impl Into<String>) -> Result<()> {
    Err(SettingsError::Invalid {
        key,
        reason: reason.into(),
    })
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

/// Parse a log format name (`json` or `pretty`, case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
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

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
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

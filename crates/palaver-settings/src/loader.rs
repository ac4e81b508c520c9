//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PalaverSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cors::parse_cors_origins;
use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, PalaverSettings};

/// Load settings from defaults and the process environment only.
pub fn load_settings() -> Result<PalaverSettings> {
    load_settings_from_path(None)
}

/// Load settings, merging `path` over defaults when it exists, then applying
/// environment overrides.
///
/// A missing file falls back to defaults. A file with invalid JSON is an error.
pub fn load_settings_from_path(path: Option<&Path>) -> Result<PalaverSettings> {
    let defaults = serde_json::to_value(PalaverSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: PalaverSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut PalaverSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Empty values are treated as unset. Values that fail to parse are ignored
/// with a warning and the file/default value is kept.
pub fn apply_overrides<F>(settings: &mut PalaverSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── App ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("APP_NAME") {
        settings.app.name = v;
    }
    if let Some(v) = env.string("ENVIRONMENT") {
        settings.app.environment = v;
    }
    if let Some(v) = env.bool("DEBUG") {
        settings.app.debug = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("PORT", |s| parse_u64_range(s, 1, 65_535)) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = env.string("CORS_ORIGINS") {
        settings.server.cors_origins = parse_cors_origins(&v);
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.parsed("MAX_CONNECTIONS", |s| parse_u64_range(s, 1, 100_000)) {
        settings.session.max_connections = usize::try_from(v).unwrap_or(settings.session.max_connections);
    }
    if let Some(v) = env.parsed("SESSION_TIMEOUT_SECS", |s| parse_u64_range(s, 1, 86_400)) {
        settings.session.session_timeout_secs = v;
    }
    if let Some(v) = env.parsed("SWEEP_INTERVAL_SECS", |s| parse_u64_range(s, 1, 3_600)) {
        settings.session.sweep_interval_secs = v;
    }

    // ── OpenAI ──────────────────────────────────────────────────────
    if let Some(v) = env.string("OPENAI_API_KEY") {
        settings.openai.api_key = v;
    }
    if let Some(v) = env.string("OPENAI_API_BASE") {
        settings.openai.api_base = v;
    }
    if let Some(v) = env.string("OPENAI_API_VERSION") {
        settings.openai.api_version = v;
    }
    if let Some(v) = env.string("OPENAI_DEPLOYMENT_NAME") {
        settings.openai.deployment_name = v;
    }
    if let Some(v) = env.parsed("OPENAI_TEMPERATURE", |s| parse_f32_range(s, 0.0, 2.0)) {
        settings.openai.temperature = v;
    }
    if let Some(v) = env.parsed("OPENAI_MAX_TOKENS", |s| parse_u64_range(s, 1, 1_000_000)) {
        settings.openai.max_tokens = u32::try_from(v).unwrap_or(settings.openai.max_tokens);
    }
    if let Some(v) = env.parsed("OPENAI_TOP_P", |s| parse_f32_range(s, 0.0, 1.0)) {
        settings.openai.top_p = v;
    }
    if let Some(v) = env.parsed("OPENAI_FREQUENCY_PENALTY", |s| parse_f32_range(s, -2.0, 2.0)) {
        settings.openai.frequency_penalty = v;
    }
    if let Some(v) = env.parsed("OPENAI_PRESENCE_PENALTY", |s| parse_f32_range(s, -2.0, 2.0)) {
        settings.openai.presence_penalty = v;
    }
    if let Some(v) = env.string("SYSTEM_PROMPT") {
        settings.openai.system_prompt = v;
    }

    // ── Vector search ───────────────────────────────────────────────
    if let Some(v) = env.bool("VECTOR_SEARCH_ENABLED") {
        settings.vector_search.enabled = v;
    }
    if let Some(v) = env.string("VECTOR_SEARCH_ENDPOINT") {
        settings.vector_search.endpoint = v;
    }
    if let Some(v) = env.string("VECTOR_SEARCH_KEY") {
        settings.vector_search.key = v;
    }
    if let Some(v) = env.string("VECTOR_SEARCH_INDEX") {
        settings.vector_search.index = v;
    }
    if let Some(v) = env.string("VECTOR_SEARCH_SEMANTIC_CONFIG") {
        settings.vector_search.semantic_config = v;
    }
    if let Some(v) = env.string("VECTOR_SEARCH_EMBEDDING_DEPLOYMENT") {
        settings.vector_search.embedding_deployment = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("LOG_FORMAT", parse_log_format) {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f32` within a range.
pub fn parse_f32_range(val: &str, min: f32, max: f32) -> Option<f32> {
    let n: f32 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

/// Parse a log format name.
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.trim().to_lowercase().as_str() {
        "compact" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
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
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, parse_bool)
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

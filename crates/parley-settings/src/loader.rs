//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ParleySettings;

/// Env var naming the settings file.
pub const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG";

/// Resolve the settings file path: `$PARLEY_CONFIG`, else `./parley.json`.
pub fn settings_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("parley.json"), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ParleySettings = serde_json::from_value(merged)?;
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

/// Reject settings the runtime cannot work with.
pub fn validate(settings: &ParleySettings) -> Result<()> {
    if settings.rag.floor == 0 {
        return Err(SettingsError::InvalidValue("rag.floor must be at least 1".into()));
    }
    if settings.rag.query_chunks_limit < settings.rag.floor {
        return Err(SettingsError::InvalidValue(
            "rag.queryChunksLimit must not be below rag.floor".into(),
        ));
    }
    if settings.ai.context_messages_limit == 0 {
        return Err(SettingsError::InvalidValue(
            "ai.contextMessagesLimit must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (file/default value wins).
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("PARLEY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("ALLOWED_ORIGINS") {
        settings.server.cors_origins = parse_list(&v);
    }

    // ── Providers ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_ENABLED_PROVIDERS") {
        settings.providers.enabled = parse_list(&v);
    }
    if let Some(v) = read_env_string("OPENAI_BASE_URL") {
        settings.providers.openai_base_url = v;
    }
    if let Some(v) = read_env_string("YANDEX_FM_OPENAI_API_URL") {
        settings.providers.yandex_openai_url = v;
    }
    if let Some(v) = read_env_string("YANDEX_FM_API_URL") {
        settings.providers.yandex_fm_url = v;
    }
    if let Some(v) = read_env_string("AWS_BEDROCK_REGION") {
        settings.providers.bedrock_region = v;
    }

    // ── AI / streaming ──────────────────────────────────────────────
    if let Some(v) = read_env_usize("PARLEY_CONTEXT_MESSAGES_LIMIT", 1, 10_000) {
        settings.ai.context_messages_limit = v;
    }
    if let Some(v) = read_env_string("PARLEY_DEFAULT_MODEL") {
        settings.ai.default_model_id = Some(v);
    }
    if let Some(v) = read_env_u64("PARLEY_STREAM_THROTTLE_MS", 0, 10_000) {
        settings.streaming.min_update_interval_ms = v;
    }

    // ── RAG ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("RAG_QUERY_CHUNKS_LIMIT", 1, 1000) {
        settings.rag.query_chunks_limit = v;
    }
    if let Some(v) = read_env_bool("RAG_LOAD_FULL_PAGES") {
        settings.rag.load_full_pages = v;
    }

    // ── Search / logging ────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_SEARCH_URL") {
        settings.search.base_url = Some(v);
    }
    if let Some(v) = read_env_bool("PARLEY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`y`/`on` or
/// `false`/`0`/`no`/`n`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
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
    use serde_json::json;

    #[test]
    fn deep_merge_objects_recursively() {
        let target = json!({"rag": {"floor": 1, "loadFullPages": true}});
        let source = json!({"rag": {"floor": 2}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["rag"]["floor"], 2);
        assert_eq!(merged["rag"]["loadFullPages"], true);
    }

    #[test]
    fn deep_merge_skips_null_and_replaces_arrays() {
        let target = json!({"enabled": ["OPEN_AI"], "port": 4000});
        let source = json!({"enabled": ["*"], "port": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["enabled"], json!(["*"]));
        assert_eq!(merged["port"], 4000);
    }

    #[test]
    fn parse_bool_accepts_short_forms() {
        assert_eq!(parse_bool("Y"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_list_trims() {
        assert_eq!(parse_list(" OPEN_AI, ,CUSTOM_REST_API "), vec!["OPEN_AI", "CUSTOM_REST_API"]);
        assert_eq!(parse_list("*"), vec!["*"]);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_usize_range("10", 1, 1000), Some(10));
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.rag.query_chunks_limit, ParleySettings::default().rag.query_chunks_limit);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.json");
        std::fs::write(
            &path,
            r#"{
                "ai": {"contextMessagesLimit": 20},
                "mcpServers": [{"id": "srv-1", "name": "files", "url": "http://localhost:9000/mcp"}]
            }"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.ai.context_messages_limit, 20);
        assert!((settings.ai.default_temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.mcp_servers.len(), 1);
        assert_eq!(settings.mcp_servers[0].id.as_str(), "srv-1");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings_from_path(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn zero_rag_floor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.json");
        std::fs::write(&path, r#"{"rag": {"floor": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }
}

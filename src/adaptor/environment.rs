//! Runtime environment detection and default configuration lookup.

use std::env;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

/// Returns the parsed `__FIREBASE_DEFAULTS__` object when available.
pub(crate) fn firebase_defaults() -> Option<Value> {
    defaults_from_env().or_else(defaults_from_path)
}

fn defaults_from_env() -> Option<Value> {
    let raw = env::var("__FIREBASE_DEFAULTS__").ok()?;
    serde_json::from_str(&raw).ok()
}

fn defaults_from_path() -> Option<Value> {
    let path = env::var("__FIREBASE_DEFAULTS_PATH").ok()?;
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Accepts inline JSON, a path to a JSON file, or `key=value,key=value`.
pub(crate) fn parse_config_source(raw: &str) -> Option<Value> {
    if let Ok(json) = serde_json::from_str::<Value>(raw) {
        if json.is_object() {
            return Some(json);
        }
    }

    if let Some(path) = treat_as_path(raw) {
        if let Ok(contents) = fs::read_to_string(path) {
            if let Ok(json) = serde_json::from_str::<Value>(&contents) {
                if json.is_object() {
                    return Some(json);
                }
            }
        }
    }

    parse_key_value_config(raw)
}

fn treat_as_path(raw: &str) -> Option<&str> {
    if raw.contains('=') {
        return None;
    }
    let trimmed = raw.trim();
    Path::new(trimmed).exists().then_some(trimmed)
}

fn parse_key_value_config(raw: &str) -> Option<Value> {
    let mut map = Map::new();
    for entry in raw.split(',') {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            continue;
        }
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    (!map.is_empty()).then_some(Value::Object(map))
}

/// The app configuration (`projectId`, `apiKey`, ...) from
/// `__FIREBASE_DEFAULTS__` or `FIREBASE_CONFIG`.
pub(crate) fn default_app_config_json() -> Option<Map<String, Value>> {
    if let Some(defaults) = firebase_defaults() {
        if let Some(config) = defaults.get("config").and_then(Value::as_object) {
            return Some(config.clone());
        }
    }

    let raw = env::var("FIREBASE_CONFIG").ok()?;
    parse_config_source(&raw)?.as_object().cloned()
}

/// `emulatorHosts.firestore` from `__FIREBASE_DEFAULTS__`.
pub(crate) fn default_emulator_host() -> Option<String> {
    firebase_defaults()?
        .get("emulatorHosts")?
        .get("firestore")?
        .as_str()
        .map(str::to_string)
}

fn force_environment() -> Option<String> {
    firebase_defaults()
        .and_then(|defaults| defaults.get("forceEnvironment").cloned())
        .or_else(|| env::var("FIREBASE_ENV_FORCE").ok().map(Value::String))
        .and_then(|value| match value {
            Value::String(text) => Some(text.to_lowercase()),
            _ => None,
        })
}

/// Returns `true` if the process should use the end-user (browser) client.
///
/// Native processes are servers unless `FIREBASE_ENV_FORCE` or the
/// `forceEnvironment` default says `browser`.
pub fn is_browser() -> bool {
    force_environment().as_deref() == Some("browser")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_configs() {
        let value = parse_key_value_config("apiKey=foo, projectId=my-proj,broken").unwrap();
        let map = value.as_object().unwrap();
        assert_eq!(map.get("apiKey").unwrap().as_str(), Some("foo"));
        assert_eq!(map.get("projectId").unwrap().as_str(), Some("my-proj"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn parse_config_source_accepts_files_and_json() {
        let json = parse_config_source("{\"apiKey\":\"foo\"}").unwrap();
        assert_eq!(json["apiKey"], "foo");

        let mut path = std::env::temp_dir();
        path.push(format!(
            "typed_firestore_config_{}.json",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::write(&path, "{\"projectId\":\"demo\"}").unwrap();
        let path_str = path.to_string_lossy().to_string();
        let file_json = parse_config_source(&path_str).unwrap();
        assert_eq!(file_json["projectId"], "demo");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn rejects_sources_without_entries() {
        assert!(parse_config_source("[1, 2]").is_none());
        assert!(parse_config_source("").is_none());
    }
}

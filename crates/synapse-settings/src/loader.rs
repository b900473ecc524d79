//! Layered settings loading.
//!
//! File values deep-merge over compiled defaults; `SYNAPSE_*` environment
//! variables override both. A missing file is not an error (defaults apply);
//! an unreadable or unparseable file is.

use std::path::Path;

use serde_json::Value;

use crate::errors::Result;
use crate::types::SyncSettings;

/// Deep-merge `overlay` onto `base`.
///
/// Objects merge key-by-key recursively; any other value type in the overlay
/// replaces the base value wholesale.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from a JSON file, merge over defaults, apply env overrides,
/// and validate.
pub fn load_settings_from_path(path: &Path) -> Result<SyncSettings> {
    let defaults = serde_json::to_value(SyncSettings::default())?;
    let merged = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        let overlay: Value = serde_json::from_str(&contents)?;
        deep_merge(defaults, overlay)
    } else {
        tracing::debug!(?path, "settings file absent, using defaults");
        defaults
    };

    let mut settings: SyncSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Apply `SYNAPSE_*` environment overrides. Unparseable values are ignored
/// with a warning so a bad shell export can't take the sync layer down.
fn apply_env_overrides(settings: &mut SyncSettings) {
    if let Ok(value) = std::env::var("SYNAPSE_RECONCILE_INTERVAL_MS") {
        match value.parse() {
            Ok(ms) => settings.reconcile_interval_ms = ms,
            Err(_) => tracing::warn!(value, "ignoring bad SYNAPSE_RECONCILE_INTERVAL_MS"),
        }
    }
    if let Ok(value) = std::env::var("SYNAPSE_PUSH_MIN_CONFIDENCE") {
        match value.parse() {
            Ok(threshold) => settings.push_min_confidence = threshold,
            Err(_) => tracing::warn!(value, "ignoring bad SYNAPSE_PUSH_MIN_CONFIDENCE"),
        }
    }
    if let Ok(value) = std::env::var("SYNAPSE_STAGING_DIR") {
        settings.staging_dir = Some(value.into());
    }
    if let Ok(value) = std::env::var("SYNAPSE_SOCKET_PATH") {
        settings.bus.socket_path = value.into();
    }
    if let Ok(value) = std::env::var("SYNAPSE_EMULATION") {
        settings.emulation = matches!(value.as_str(), "1" | "true" | "yes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Tests that mutate `SYNAPSE_*` env vars hold this lock to avoid racing
    /// with each other (Rust runs tests in parallel threads).
    static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[allow(unsafe_code)]
    fn with_env(key: &str, value: &str, f: impl FnOnce()) {
        let _guard = ENV_MUTEX.lock().unwrap();
        let prev = std::env::var(key).ok();
        // SAFETY: serialized by ENV_MUTEX and restored before returning.
        unsafe { std::env::set_var(key, value) };
        f();
        match prev {
            Some(v) => unsafe { std::env::set_var(key, v) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn deep_merge_overlays_nested_keys() {
        let base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = json!({"a": {"y": 20}});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 20}, "b": 3}));
    }

    #[test]
    fn deep_merge_replaces_non_objects() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged["a"], json!([3]));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.reconcile_interval_ms, 5_000);
    }

    #[test]
    fn file_values_override_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"pushBatchLimit": 5, "notify": {"notificationName": "com.test.ctx"}}"#)
            .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.push_batch_limit, 5);
        assert_eq!(settings.notify.notification_name, "com.test.ctx");
        // Untouched nested fields keep defaults.
        assert_eq!(settings.notify.post_program, "synapse-notify-post");
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"reconcileIntervalMs": 2000}"#).unwrap();
        with_env("SYNAPSE_RECONCILE_INTERVAL_MS", "9000", || {
            let settings = load_settings_from_path(&path).unwrap();
            assert_eq!(settings.reconcile_interval_ms, 9_000);
        });
    }

    #[test]
    fn bad_env_value_ignored() {
        let dir = tempfile::tempdir().unwrap();
        with_env("SYNAPSE_PUSH_MIN_CONFIDENCE", "high", || {
            let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
            assert!((settings.push_min_confidence - 0.7).abs() < f64::EPSILON);
        });
    }

    #[test]
    fn env_emulation_flag() {
        let dir = tempfile::tempdir().unwrap();
        with_env("SYNAPSE_EMULATION", "true", || {
            let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
            assert!(settings.emulation);
        });
    }

    #[test]
    fn loaded_settings_are_validated() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"pushMinConfidence": 7.0}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert!((settings.push_min_confidence - 1.0).abs() < f64::EPSILON);
    }
}

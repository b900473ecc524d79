//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON wire
//! format. Each type implements [`Default`] with production default values.
//! Types marked with `#[serde(default)]` allow partial JSON — missing fields
//! get their default value during deserialization.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings for context synchronization.
///
/// # JSON Format
///
/// All field names are camelCase. Example:
///
/// ```json
/// {
///   "reconcileIntervalMs": 5000,
///   "pushMinConfidence": 0.7,
///   "allowedApps": ["com.example.*"],
///   "bus": { "socketPath": "/run/synapse/context.sock" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Directory for transient helper scripts and payload files.
    /// `None` means a `synapse-helpers` folder under the OS temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
    /// Peer applications allowed to contribute context. Glob patterns;
    /// `["*"]` accepts everyone.
    pub allowed_apps: Vec<String>,
    /// Context kinds accepted inbound. Glob patterns; `["*"]` accepts all.
    pub allowed_kinds: Vec<String>,
    /// Register a system-wide listen scope at startup.
    pub system_wide: bool,
    /// Additionally register one listen scope per explicitly named
    /// (non-glob) allowed application.
    pub per_app: bool,
    /// Reconciliation period in milliseconds.
    pub reconcile_interval_ms: u64,
    /// Minimum confidence for a record to be outbound-eligible.
    pub push_min_confidence: f64,
    /// Maximum records pushed per reconciliation tick, newest first.
    pub push_batch_limit: usize,
    /// Transport lock acquisition timeout in milliseconds. Callers fail
    /// with a timeout error rather than queue indefinitely.
    pub lock_timeout_ms: u64,
    /// Base delay before relaunching a crashed helper, in milliseconds.
    pub relaunch_backoff_ms: u64,
    /// Upper bound on the relaunch delay, in milliseconds.
    pub relaunch_backoff_cap_ms: u64,
    /// Use in-process stand-ins instead of real OS facilities. Intended for
    /// constrained and test environments.
    pub emulation: bool,
    /// Notification-bus transport settings.
    pub notify: NotifySettings,
    /// Native context-API transport settings.
    pub native: NativeSettings,
    /// Message-bus / socket transport settings.
    pub bus: BusSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            staging_dir: None,
            allowed_apps: vec!["*".to_string()],
            allowed_kinds: vec!["*".to_string()],
            system_wide: true,
            per_app: false,
            reconcile_interval_ms: 5_000,
            push_min_confidence: 0.7,
            push_batch_limit: 20,
            lock_timeout_ms: 30_000,
            relaunch_backoff_ms: 250,
            relaunch_backoff_cap_ms: 10_000,
            emulation: false,
            notify: NotifySettings::default(),
            native: NativeSettings::default(),
            bus: BusSettings::default(),
        }
    }
}

impl SyncSettings {
    /// Clamp ratio fields and correct invalid invariants.
    ///
    /// Called automatically during loading.
    pub fn validate(&mut self) {
        if self.push_min_confidence < 0.0 || self.push_min_confidence > 1.0 {
            let clamped = self.push_min_confidence.clamp(0.0, 1.0);
            tracing::warn!(
                "pushMinConfidence out of range ({}), clamped to {clamped}",
                self.push_min_confidence
            );
            self.push_min_confidence = clamped;
        }
        if self.reconcile_interval_ms == 0 {
            tracing::warn!("reconcileIntervalMs must be positive, corrected to 1000");
            self.reconcile_interval_ms = 1_000;
        }
        if self.relaunch_backoff_cap_ms < self.relaunch_backoff_ms {
            tracing::warn!(
                "relaunchBackoffCapMs ({}) < relaunchBackoffMs ({}), correcting",
                self.relaunch_backoff_cap_ms,
                self.relaunch_backoff_ms
            );
            self.relaunch_backoff_cap_ms = self.relaunch_backoff_ms;
        }
        if self.allowed_apps.is_empty() {
            tracing::warn!("allowedApps is empty, no inbound context would be accepted");
        }
    }

    /// Explicitly named (non-glob) allowed applications, used for per-app
    /// listen scopes.
    #[must_use]
    pub fn explicit_apps(&self) -> Vec<&str> {
        self.allowed_apps
            .iter()
            .filter(|app| !app.contains('*') && !app.contains('?'))
            .map(String::as_str)
            .collect()
    }
}

/// Notification-bus transport settings (macOS-style).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySettings {
    /// System-wide notification name records travel on.
    pub notification_name: String,
    /// Short-lived helper invoked to post one notification.
    pub post_program: String,
    /// Long-lived helper that registers for the notification and prints
    /// matching payloads as JSON lines.
    pub listen_program: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            notification_name: "com.synapse.context".to_string(),
            post_program: "synapse-notify-post".to_string(),
            listen_program: "synapse-notify-listen".to_string(),
        }
    }
}

/// Native context-API transport settings (Windows-style).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NativeSettings {
    /// Command-line automation host wrapping the first-party context API.
    pub host_program: String,
}

impl Default for NativeSettings {
    fn default() -> Self {
        Self {
            host_program: "synapse-ctx-host".to_string(),
        }
    }
}

/// Message-bus / socket transport settings (Linux-style).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Unix socket path of the companion context service.
    pub socket_path: PathBuf,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/synapse/context.sock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let s = SyncSettings::default();
        assert_eq!(s.reconcile_interval_ms, 5_000);
        assert!((s.push_min_confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(s.push_batch_limit, 20);
        assert_eq!(s.lock_timeout_ms, 30_000);
        assert_eq!(s.allowed_apps, vec!["*"]);
        assert!(s.system_wide);
        assert!(!s.per_app);
        assert!(!s.emulation);
    }

    #[test]
    fn empty_json_produces_defaults() {
        let s: SyncSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.reconcile_interval_ms, 5_000);
        assert_eq!(s.notify.notification_name, "com.synapse.context");
    }

    #[test]
    fn partial_json_overrides() {
        let json = serde_json::json!({
            "reconcileIntervalMs": 1000,
            "bus": { "socketPath": "/tmp/test.sock" }
        });
        let s: SyncSettings = serde_json::from_value(json).unwrap();
        assert_eq!(s.reconcile_interval_ms, 1_000);
        assert_eq!(s.bus.socket_path, PathBuf::from("/tmp/test.sock"));
        // Unset fields keep defaults.
        assert_eq!(s.push_batch_limit, 20);
        assert_eq!(s.native.host_program, "synapse-ctx-host");
    }

    #[test]
    fn serde_camel_case_field_names() {
        let json = serde_json::to_value(SyncSettings::default()).unwrap();
        assert!(json.get("reconcileIntervalMs").is_some());
        assert!(json.get("pushMinConfidence").is_some());
        assert!(json.get("allowedApps").is_some());
        assert!(json.get("reconcile_interval_ms").is_none());
        // Optional staging dir omitted when None.
        assert!(json.get("stagingDir").is_none());
    }

    #[test]
    fn validate_clamps_confidence() {
        let mut s = SyncSettings::default();
        s.push_min_confidence = 1.5;
        s.validate();
        assert!((s.push_min_confidence - 1.0).abs() < f64::EPSILON);

        s.push_min_confidence = -0.2;
        s.validate();
        assert!(s.push_min_confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn validate_corrects_zero_interval() {
        let mut s = SyncSettings::default();
        s.reconcile_interval_ms = 0;
        s.validate();
        assert_eq!(s.reconcile_interval_ms, 1_000);
    }

    #[test]
    fn validate_corrects_backoff_inversion() {
        let mut s = SyncSettings::default();
        s.relaunch_backoff_ms = 5_000;
        s.relaunch_backoff_cap_ms = 1_000;
        s.validate();
        assert_eq!(s.relaunch_backoff_cap_ms, 5_000);
    }

    #[test]
    fn validate_preserves_valid_values() {
        let mut s = SyncSettings::default();
        s.validate();
        assert!((s.push_min_confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(s.relaunch_backoff_cap_ms, 10_000);
    }

    #[test]
    fn explicit_apps_skips_globs() {
        let mut s = SyncSettings::default();
        s.allowed_apps = vec![
            "com.example.editor".to_string(),
            "com.example.*".to_string(),
            "org.browser?".to_string(),
        ];
        assert_eq!(s.explicit_apps(), vec!["com.example.editor"]);
    }
}

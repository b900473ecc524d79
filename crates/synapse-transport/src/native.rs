//! First-party context API transport (Windows-style).
//!
//! The OS context-sharing API is reachable only through a command-line
//! automation host. Availability is probed once at startup; when the host
//! is absent the adapter runs the notification-bus pattern instead, so the
//! public contract still holds with weaker delivery guarantees.
//!
//! The host exposes no visible delete event — removal of published
//! activities relies on their expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use synapse_core::{ContextRecord, Provenance, Result, SyncError, identity};
use synapse_settings::SyncSettings;
use tracing::{debug, info, warn};

use crate::adapter::{
    Inbound, PeerFilter, SubscriptionHandle, SubscriptionScope, TransportAdapter, TransportKind,
};
use crate::artifacts::StagingArea;
use crate::notify::NotifyBusAdapter;
use crate::runner::{CommandRunner, CommandSpec};
use crate::supervisor::BackoffPolicy;

/// Wire schema of one activity as the automation host prints it.
///
/// Deliberately different in shape from the notification envelope: the
/// native API speaks in activities with a weight, not records with a
/// confidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeActivity {
    /// Host-assigned activity id (correlation id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    /// Producer application id.
    pub app_id: String,
    /// Producer display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_display_name: Option<String>,
    /// Activity classification.
    pub activity_type: String,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// RFC 3339 observation time.
    pub observed_at: String,
    /// Optional RFC 3339 expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Relevance weight in [0, 1] (maps to confidence).
    #[serde(default)]
    pub weight: f64,
    /// Ordering hint.
    #[serde(default)]
    pub rank: i32,
    /// Classification labels (maps to tags).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Whether the activity is visible machine-wide or only to the
    /// publishing app.
    pub shared: bool,
}

/// Local→external mapping. Stamps this agent's identity and marks the
/// activity machine-visible.
#[must_use]
pub fn activity_from_record(record: &ContextRecord) -> NativeActivity {
    NativeActivity {
        activity_id: Some(record.id.clone()),
        app_id: identity::APP_ID.to_string(),
        app_display_name: Some(identity::APP_NAME.to_string()),
        activity_type: record.kind.clone(),
        payload: record.data.clone(),
        observed_at: record.timestamp.clone(),
        expires_at: record.expires_at.clone(),
        weight: record.confidence,
        rank: record.priority,
        labels: record.tags.iter().cloned().collect(),
        shared: true,
    }
}

/// External→local mapping. Derives the local id and stamps the adapter's
/// source tag.
#[must_use]
pub fn record_from_activity(activity: &NativeActivity) -> ContextRecord {
    ContextRecord {
        id: identity::derive_external_id(
            activity.activity_id.as_deref(),
            &activity.app_id,
            &activity.activity_type,
            &activity.observed_at,
        ),
        source: TransportKind::NativeApi.source_tag().to_string(),
        kind: activity.activity_type.clone(),
        data: activity.payload.clone(),
        timestamp: activity.observed_at.clone(),
        expires_at: activity.expires_at.clone(),
        priority: activity.rank,
        confidence: activity.weight,
        tags: activity.labels.iter().cloned().collect(),
        metadata: Provenance {
            source_app_id: Some(activity.app_id.clone()),
            source_app_name: activity.app_display_name.clone(),
            external_id: activity.activity_id.clone(),
        },
    }
}

enum Mode {
    /// The automation host answered the capability probe.
    Native {
        host_program: String,
        staging: StagingArea,
        subs: Mutex<HashMap<u64, SubscriptionHandle>>,
        next_sub_id: AtomicU64,
    },
    /// Host absent; running the notification-bus pattern instead.
    Fallback(NotifyBusAdapter),
}

/// Native context-API transport adapter.
pub struct NativeApiAdapter {
    runner: Arc<dyn CommandRunner>,
    filter: PeerFilter,
    mode: Mode,
}

impl NativeApiAdapter {
    /// Probe the automation host once and build the adapter in native or
    /// fallback mode accordingly. Never fails on an absent host.
    pub async fn detect(settings: &SyncSettings, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let filter = PeerFilter::new(&settings.allowed_apps, &settings.allowed_kinds)?;
        let probe = CommandSpec::new(
            settings.native.host_program.clone(),
            vec!["capabilities".to_string()],
        );
        let available = match runner.run(&probe).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!(exit_code = output.exit_code, "context host probe failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "context host not present");
                false
            }
        };

        let mode = if available {
            info!(host = %settings.native.host_program, "native context API available");
            Mode::Native {
                host_program: settings.native.host_program.clone(),
                staging: StagingArea::new(settings.staging_dir.clone())?,
                subs: Mutex::new(HashMap::new()),
                next_sub_id: AtomicU64::new(1),
            }
        } else {
            info!("falling back to notification-bus pattern");
            let fallback_filter = PeerFilter::new(&settings.allowed_apps, &settings.allowed_kinds)?;
            Mode::Fallback(NotifyBusAdapter::new(
                settings.notify.clone(),
                Arc::clone(&runner),
                StagingArea::new(settings.staging_dir.clone())?,
                fallback_filter,
                BackoffPolicy {
                    base: std::time::Duration::from_millis(settings.relaunch_backoff_ms),
                    cap: std::time::Duration::from_millis(settings.relaunch_backoff_cap_ms),
                },
            ))
        };

        Ok(Self {
            runner,
            filter,
            mode,
        })
    }

    async fn host_call(
        &self,
        operation: &str,
        host_program: &str,
        args: Vec<String>,
    ) -> Result<String> {
        let spec = CommandSpec::new(host_program.to_string(), args);
        let output = self.runner.run(&spec).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(SyncError::transport(operation, output.stderr.trim()))
        }
    }
}

#[async_trait]
impl TransportAdapter for NativeApiAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::NativeApi
    }

    fn is_native(&self) -> bool {
        matches!(self.mode, Mode::Native { .. })
    }

    async fn emit(&self, record: &ContextRecord) -> Result<()> {
        match &self.mode {
            Mode::Native {
                host_program,
                staging,
                ..
            } => {
                let payload = serde_json::to_string(&activity_from_record(record))?;
                let staged = staging.stage("native-publish", &payload)?;
                let args = vec![
                    "publish".to_string(),
                    staged.path().display().to_string(),
                ];
                let _ = self.host_call("emit", host_program, args).await?;
                staged.remove();
                Ok(())
            }
            Mode::Fallback(inner) => inner.emit(record).await,
        }
    }

    async fn pull(&self) -> Result<Vec<Inbound>> {
        match &self.mode {
            Mode::Native { host_program, .. } => {
                let stdout = self
                    .host_call("pull", host_program, vec!["query".to_string()])
                    .await?;
                let activities: Vec<NativeActivity> = serde_json::from_str(stdout.trim())?;
                Ok(activities
                    .iter()
                    .filter(|activity| activity.app_id != identity::APP_ID)
                    .filter(|activity| {
                        let allowed = self
                            .filter
                            .allows(Some(&activity.app_id), &activity.activity_type);
                        if !allowed {
                            debug!(app = %activity.app_id, "dropping activity from disallowed peer");
                        }
                        allowed
                    })
                    .map(|activity| Inbound::Upsert(record_from_activity(activity)))
                    .collect())
            }
            Mode::Fallback(inner) => inner.pull().await,
        }
    }

    async fn retract(&self, id: &str) -> Result<bool> {
        match &self.mode {
            Mode::Native { .. } => {
                // The native API has no visible delete; consumers see the
                // record disappear at expiry.
                debug!(id, "native API cannot propagate removal, relying on expiry");
                Ok(false)
            }
            Mode::Fallback(inner) => inner.retract(id).await,
        }
    }

    async fn subscribe(&self, scope: SubscriptionScope) -> Result<SubscriptionHandle> {
        match &self.mode {
            Mode::Native {
                host_program,
                subs,
                next_sub_id,
                ..
            } => {
                let scope_arg = match &scope {
                    SubscriptionScope::SystemWide => "--all".to_string(),
                    SubscriptionScope::App(app) => format!("--app={app}"),
                };
                let stdout = self
                    .host_call(
                        "subscribe",
                        host_program,
                        vec!["subscribe".to_string(), scope_arg],
                    )
                    .await?;
                let token = stdout.trim().to_string();
                let handle = SubscriptionHandle {
                    id: next_sub_id.fetch_add(1, Ordering::Relaxed),
                    scope,
                    token,
                };
                let _ = subs.lock().insert(handle.id, handle.clone());
                Ok(handle)
            }
            Mode::Fallback(inner) => inner.subscribe(scope).await,
        }
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        match &self.mode {
            Mode::Native {
                host_program, subs, ..
            } => {
                let _ = subs.lock().remove(&handle.id);
                let _ = self
                    .host_call(
                        "unsubscribe",
                        host_program,
                        vec!["unsubscribe".to_string(), handle.token.clone()],
                    )
                    .await?;
                Ok(())
            }
            Mode::Fallback(inner) => inner.unsubscribe(handle).await,
        }
    }

    fn subscription_count(&self) -> usize {
        match &self.mode {
            Mode::Native { subs, .. } => subs.lock().len(),
            Mode::Fallback(inner) => inner.subscription_count(),
        }
    }

    fn helper_relaunches(&self) -> u64 {
        match &self.mode {
            Mode::Native { .. } => 0,
            Mode::Fallback(inner) => inner.helper_relaunches(),
        }
    }

    fn take_events(&self) -> Vec<Inbound> {
        match &self.mode {
            // Native mode is polling-only; inbound arrives via pull.
            Mode::Native { .. } => Vec::new(),
            Mode::Fallback(inner) => inner.take_events(),
        }
    }

    async fn shutdown(&self) {
        match &self.mode {
            Mode::Native { subs, .. } => subs.lock().clear(),
            Mode::Fallback(inner) => inner.shutdown().await,
        }
    }
}

//! Distributed notification bus transport (macOS-style).
//!
//! Outbound: each emit stages the serialized envelope and runs a
//! short-lived helper that posts one system-wide notification carrying it.
//! Inbound: a supervised long-lived helper registers for the notification
//! and prints matching payloads as JSON lines, which are tailed into the
//! adapter's inbound queue. Local removals are propagated as tombstone
//! notifications.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use synapse_core::{ContextRecord, Provenance, Result, SyncError, identity};
use synapse_settings::NotifySettings;
use tracing::{debug, warn};

use crate::adapter::{
    Inbound, PeerFilter, SubscriptionHandle, SubscriptionScope, TransportAdapter, TransportKind,
};
use crate::artifacts::StagingArea;
use crate::runner::{CommandRunner, CommandSpec};
use crate::supervisor::{BackoffPolicy, HelperSpec, HelperSupervisor};

/// Operation discriminator on the notification payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOp {
    /// Create or replace the record.
    Set,
    /// Tombstone: the producer retracted the record.
    Delete,
}

/// Wire schema of one notification payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEnvelope {
    /// Operation.
    pub op: NotifyOp,
    /// Producer-assigned correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Producer application id.
    pub app_id: String,
    /// Producer display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Classification string.
    pub kind: String,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// RFC 3339 observation time.
    pub timestamp: String,
    /// Optional RFC 3339 expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// Ordering hint.
    #[serde(default)]
    pub priority: i32,
    /// Filtering tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Delivery scope on the bus (`system` or a target app id).
    pub scope: String,
}

/// Local→external mapping. Stamps this agent's identity and the system
/// delivery scope.
#[must_use]
pub fn envelope_from_record(record: &ContextRecord) -> NotifyEnvelope {
    NotifyEnvelope {
        op: NotifyOp::Set,
        event_id: Some(record.id.clone()),
        app_id: identity::APP_ID.to_string(),
        app_name: Some(identity::APP_NAME.to_string()),
        kind: record.kind.clone(),
        data: record.data.clone(),
        timestamp: record.timestamp.clone(),
        expires_at: record.expires_at.clone(),
        confidence: record.confidence,
        priority: record.priority,
        tags: record.tags.clone(),
        scope: "system".to_string(),
    }
}

/// Tombstone envelope for a retracted record.
#[must_use]
pub fn tombstone_envelope(id: &str) -> NotifyEnvelope {
    NotifyEnvelope {
        op: NotifyOp::Delete,
        event_id: Some(id.to_string()),
        app_id: identity::APP_ID.to_string(),
        app_name: Some(identity::APP_NAME.to_string()),
        kind: String::new(),
        data: serde_json::Map::new(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        expires_at: None,
        confidence: 0.0,
        priority: 0,
        tags: BTreeSet::new(),
        scope: "system".to_string(),
    }
}

/// External→local mapping. Derives the local id and stamps the adapter's
/// source tag so the record is never echoed back.
#[must_use]
pub fn record_from_envelope(envelope: &NotifyEnvelope) -> ContextRecord {
    ContextRecord {
        id: identity::derive_external_id(
            envelope.event_id.as_deref(),
            &envelope.app_id,
            &envelope.kind,
            &envelope.timestamp,
        ),
        source: TransportKind::NotifyBus.source_tag().to_string(),
        kind: envelope.kind.clone(),
        data: envelope.data.clone(),
        timestamp: envelope.timestamp.clone(),
        expires_at: envelope.expires_at.clone(),
        priority: envelope.priority,
        confidence: envelope.confidence,
        tags: envelope.tags.clone(),
        metadata: Provenance {
            source_app_id: Some(envelope.app_id.clone()),
            source_app_name: envelope.app_name.clone(),
            external_id: envelope.event_id.clone(),
        },
    }
}

/// Notification-bus transport adapter.
pub struct NotifyBusAdapter {
    settings: NotifySettings,
    runner: Arc<dyn CommandRunner>,
    staging: StagingArea,
    filter: PeerFilter,
    listener: HelperSupervisor,
    subs: Mutex<HashMap<u64, SubscriptionHandle>>,
    next_sub_id: AtomicU64,
}

impl NotifyBusAdapter {
    /// Build the adapter. No helper is spawned until the first subscription.
    pub fn new(
        settings: NotifySettings,
        runner: Arc<dyn CommandRunner>,
        staging: StagingArea,
        filter: PeerFilter,
        backoff: BackoffPolicy,
    ) -> Self {
        let listener = HelperSupervisor::new(
            HelperSpec {
                program: settings.listen_program.clone(),
                args: vec![settings.notification_name.clone()],
            },
            backoff,
        );
        Self {
            settings,
            runner,
            staging,
            filter,
            listener,
            subs: Mutex::new(HashMap::new()),
            next_sub_id: AtomicU64::new(1),
        }
    }

    async fn post(&self, operation: &str, envelope: &NotifyEnvelope) -> Result<()> {
        let payload = serde_json::to_string(envelope)?;
        let staged = self.staging.stage("notify-post", &payload)?;
        let spec = CommandSpec::new(
            self.settings.post_program.clone(),
            vec![
                self.settings.notification_name.clone(),
                staged.path().display().to_string(),
            ],
        );
        let output = self.runner.run(&spec).await?;
        staged.remove();
        if output.success() {
            Ok(())
        } else {
            Err(SyncError::transport(operation, output.stderr.trim()))
        }
    }

    /// Listener command line encoding the current subscription set.
    fn listener_spec(&self) -> HelperSpec {
        let mut args = vec![self.settings.notification_name.clone()];
        let subs = self.subs.lock();
        for handle in subs.values() {
            if let SubscriptionScope::App(ref app) = handle.scope {
                args.push("--app".to_string());
                args.push(app.clone());
            }
        }
        HelperSpec {
            program: self.settings.listen_program.clone(),
            args,
        }
    }

    fn parse_line(&self, line: &str) -> Option<Inbound> {
        let envelope: NotifyEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable notification payload");
                return None;
            }
        };
        // Our own posts come back over the same channel; drop them here.
        if envelope.app_id == identity::APP_ID {
            return None;
        }
        match envelope.op {
            NotifyOp::Delete => {
                let id = identity::derive_external_id(
                    envelope.event_id.as_deref(),
                    &envelope.app_id,
                    &envelope.kind,
                    &envelope.timestamp,
                );
                Some(Inbound::Remove(id))
            }
            NotifyOp::Set => {
                if !self.filter.allows(Some(&envelope.app_id), &envelope.kind) {
                    debug!(app = %envelope.app_id, kind = %envelope.kind,
                        "dropping notification from disallowed peer");
                    return None;
                }
                Some(Inbound::Upsert(record_from_envelope(&envelope)))
            }
        }
    }
}

#[async_trait]
impl TransportAdapter for NotifyBusAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::NotifyBus
    }

    fn is_native(&self) -> bool {
        true
    }

    async fn emit(&self, record: &ContextRecord) -> Result<()> {
        self.post("emit", &envelope_from_record(record)).await
    }

    async fn pull(&self) -> Result<Vec<Inbound>> {
        // The bus has no query facility; a pull is a drain of everything
        // the listener tailed since the last tick.
        Ok(self.take_events())
    }

    async fn retract(&self, id: &str) -> Result<bool> {
        self.post("retract", &tombstone_envelope(id)).await?;
        Ok(true)
    }

    async fn subscribe(&self, scope: SubscriptionScope) -> Result<SubscriptionHandle> {
        let handle = SubscriptionHandle {
            id: self.next_sub_id.fetch_add(1, Ordering::Relaxed),
            token: scope.as_token(),
            scope,
        };
        let _ = self.subs.lock().insert(handle.id, handle.clone());
        self.listener.update_spec(self.listener_spec());
        if !self.listener.is_started() {
            self.listener.start();
        }
        debug!(token = %handle.token, "notification subscription registered");
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        if self.subs.lock().remove(&handle.id).is_none() {
            warn!(token = %handle.token, "unsubscribe for unknown handle");
            return Ok(());
        }
        self.listener.update_spec(self.listener_spec());
        Ok(())
    }

    fn subscription_count(&self) -> usize {
        self.subs.lock().len()
    }

    fn helper_relaunches(&self) -> u64 {
        self.listener.relaunch_count()
    }

    fn take_events(&self) -> Vec<Inbound> {
        self.listener
            .drain_lines()
            .iter()
            .filter_map(|line| self.parse_line(line))
            .collect()
    }

    async fn shutdown(&self) {
        self.subs.lock().clear();
        self.listener.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockCommandRunner;
    use crate::runner::CommandOutput;
    use serde_json::json;

    fn adapter_with_runner(runner: MockCommandRunner) -> NotifyBusAdapter {
        NotifyBusAdapter::new(
            NotifySettings::default(),
            Arc::new(runner),
            StagingArea::new(Some(tempfile::tempdir().unwrap().keep())).unwrap(),
            PeerFilter::allow_all(),
            BackoffPolicy::default(),
        )
    }

    fn peer_envelope(event_id: Option<&str>) -> NotifyEnvelope {
        NotifyEnvelope {
            op: NotifyOp::Set,
            event_id: event_id.map(String::from),
            app_id: "com.example.editor".into(),
            app_name: Some("Editor".into()),
            kind: "focus".into(),
            data: serde_json::Map::new(),
            timestamp: "2026-08-07T00:00:00Z".into(),
            expires_at: None,
            confidence: 0.8,
            priority: 0,
            tags: BTreeSet::new(),
            scope: "system".into(),
        }
    }

    // -- Conversion --

    #[test]
    fn outbound_envelope_stamps_our_identity() {
        let record = ContextRecord::new("user_intent", "focus");
        let envelope = envelope_from_record(&record);
        assert_eq!(envelope.app_id, identity::APP_ID);
        assert_eq!(envelope.event_id.as_deref(), Some(record.id.as_str()));
        assert_eq!(envelope.scope, "system");
        assert_eq!(envelope.op, NotifyOp::Set);
    }

    #[test]
    fn inbound_record_stamps_adapter_source() {
        let record = record_from_envelope(&peer_envelope(Some("evt-1")));
        assert_eq!(record.source, "synapse.notify");
        assert_eq!(record.id, "ext-evt-1");
        assert_eq!(record.metadata.source_app_id.as_deref(), Some("com.example.editor"));
        assert_eq!(record.metadata.external_id.as_deref(), Some("evt-1"));
    }

    #[test]
    fn conversions_are_structurally_inverse() {
        let mut record = ContextRecord::new("user_intent", "focus");
        let _ = record.data.insert("file".into(), json!("main.rs"));
        record.confidence = 0.9;

        let envelope = envelope_from_record(&record);
        let back = record_from_envelope(&envelope);

        // Identity fields change by design (derived id, adapter source tag);
        // the payload fields survive the round trip.
        assert_eq!(back.kind, record.kind);
        assert_eq!(back.data, record.data);
        assert_eq!(back.timestamp, record.timestamp);
        assert!((back.confidence - record.confidence).abs() < f64::EPSILON);
        assert_eq!(back.id, format!("ext-{}", record.id));
    }

    #[test]
    fn envelope_wire_format_is_camel_case() {
        let envelope = peer_envelope(Some("evt-1"));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["op"], "set");
        assert!(json.get("eventId").is_some());
        assert!(json.get("appId").is_some());
        assert!(json.get("appName").is_some());
    }

    // -- parse_line --

    #[test]
    fn parse_line_drops_own_posts() {
        let adapter = adapter_with_runner(MockCommandRunner::new());
        let mut envelope = peer_envelope(Some("evt-1"));
        envelope.app_id = identity::APP_ID.to_string();
        let line = serde_json::to_string(&envelope).unwrap();
        assert_eq!(adapter.parse_line(&line), None);
    }

    #[test]
    fn parse_line_drops_garbage() {
        let adapter = adapter_with_runner(MockCommandRunner::new());
        assert_eq!(adapter.parse_line("not json at all"), None);
    }

    #[test]
    fn parse_line_converts_set() {
        let adapter = adapter_with_runner(MockCommandRunner::new());
        let line = serde_json::to_string(&peer_envelope(Some("evt-2"))).unwrap();
        let inbound = adapter.parse_line(&line).unwrap();
        assert_matches::assert_matches!(inbound, Inbound::Upsert(record) if record.id == "ext-evt-2");
    }

    #[test]
    fn parse_line_converts_tombstone() {
        let adapter = adapter_with_runner(MockCommandRunner::new());
        let mut envelope = peer_envelope(Some("evt-3"));
        envelope.op = NotifyOp::Delete;
        let line = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            adapter.parse_line(&line),
            Some(Inbound::Remove("ext-evt-3".into()))
        );
    }

    #[test]
    fn parse_line_respects_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = NotifyBusAdapter::new(
            NotifySettings::default(),
            Arc::new(MockCommandRunner::new()),
            StagingArea::new(Some(dir.path().to_path_buf())).unwrap(),
            PeerFilter::new(&["com.trusted.*".to_string()], &["*".to_string()]).unwrap(),
            BackoffPolicy::default(),
        );
        let line = serde_json::to_string(&peer_envelope(Some("evt-4"))).unwrap();
        assert_eq!(adapter.parse_line(&line), None);
    }

    // -- emit / retract via mocked helper --

    #[tokio::test]
    async fn emit_posts_via_short_lived_helper() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec: &CommandSpec| {
                spec.program == "synapse-notify-post" && spec.args[0] == "com.synapse.context"
            })
            .times(1)
            .returning(|_| Ok(CommandOutput { exit_code: 0, ..Default::default() }));
        let adapter = adapter_with_runner(runner);
        adapter.emit(&ContextRecord::new("user_intent", "focus")).await.unwrap();
    }

    #[tokio::test]
    async fn emit_failure_surfaces_stderr() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| {
            Ok(CommandOutput {
                exit_code: 1,
                stderr: "bus refused\n".into(),
                ..Default::default()
            })
        });
        let adapter = adapter_with_runner(runner);
        let err = adapter
            .emit(&ContextRecord::new("user_intent", "focus"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bus refused"));
    }

    #[tokio::test]
    async fn retract_reports_supported() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Ok(CommandOutput { exit_code: 0, ..Default::default() }));
        let adapter = adapter_with_runner(runner);
        assert!(adapter.retract("ctx-1").await.unwrap());
    }

    #[tokio::test]
    async fn emit_cleans_staged_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput { exit_code: 0, ..Default::default() }));
        let adapter = NotifyBusAdapter::new(
            NotifySettings::default(),
            Arc::new(runner),
            StagingArea::new(Some(dir.path().to_path_buf())).unwrap(),
            PeerFilter::allow_all(),
            BackoffPolicy::default(),
        );
        adapter.emit(&ContextRecord::new("user_intent", "focus")).await.unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "staged payload must be deleted after use");
    }

    // -- subscriptions --

    #[tokio::test]
    async fn subscribe_encodes_scopes_in_listener_args() {
        let adapter = adapter_with_runner(MockCommandRunner::new());
        let system = adapter.subscribe(SubscriptionScope::SystemWide).await.unwrap();
        let app = adapter
            .subscribe(SubscriptionScope::App("com.example.editor".into()))
            .await
            .unwrap();
        assert_eq!(adapter.subscription_count(), 2);

        let spec = adapter.listener_spec();
        assert_eq!(spec.program, "synapse-notify-listen");
        assert_eq!(spec.args[0], "com.synapse.context");
        assert!(spec.args.contains(&"--app".to_string()));
        assert!(spec.args.contains(&"com.example.editor".to_string()));

        adapter.unsubscribe(app).await.unwrap();
        assert!(!adapter.listener_spec().args.contains(&"--app".to_string()));
        adapter.unsubscribe(system).await.unwrap();
        assert_eq!(adapter.subscription_count(), 0);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn unsubscribe_unknown_handle_is_benign() {
        let adapter = adapter_with_runner(MockCommandRunner::new());
        let handle = SubscriptionHandle {
            id: 99,
            scope: SubscriptionScope::SystemWide,
            token: "system".into(),
        };
        adapter.unsubscribe(handle).await.unwrap();
    }
}

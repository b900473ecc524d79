//! The transport adapter abstraction.
//!
//! The coordinator and reconciliation loop are written once against
//! [`TransportAdapter`]; the three platform variants implement it
//! independently. Callers are expected to serialize calls that touch the
//! underlying transport — the adapters themselves do not lock.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use synapse_core::{ContextRecord, Result, SyncError};

/// Which native channel an adapter owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Distributed notification bus (macOS-style).
    NotifyBus,
    /// First-party context API via automation host (Windows-style).
    NativeApi,
    /// Message bus / direct socket (Linux-style).
    BusSocket,
}

impl TransportKind {
    /// Source tag stamped onto records this adapter converts inbound.
    /// A record carrying the tag is never pushed back out by the same
    /// adapter.
    #[must_use]
    pub fn source_tag(self) -> &'static str {
        match self {
            Self::NotifyBus => "synapse.notify",
            Self::NativeApi => "synapse.native",
            Self::BusSocket => "synapse.bus",
        }
    }

    /// Short display name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotifyBus => "notify_bus",
            Self::NativeApi => "native_api",
            Self::BusSocket => "bus_socket",
        }
    }
}

/// What an external listen registration covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Everything published on the channel.
    SystemWide,
    /// One named peer application.
    App(String),
}

impl SubscriptionScope {
    /// Stable string form, used as the default correlation token.
    #[must_use]
    pub fn as_token(&self) -> String {
        match self {
            Self::SystemWide => "system".to_string(),
            Self::App(app) => format!("app:{app}"),
        }
    }
}

/// One outstanding external listen registration.
///
/// Carries the transport's opaque correlation token so teardown is
/// symmetric with registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Adapter-local handle id.
    pub id: u64,
    /// Registered scope.
    pub scope: SubscriptionScope,
    /// Transport-assigned correlation token.
    pub token: String,
}

/// An inbound change received from the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Upsert this record (get-or-create then merge-update).
    Upsert(ContextRecord),
    /// The peer retracted the record with this derived local id.
    Remove(String),
}

/// Inbound allow-list over peer applications and context kinds.
///
/// Built from the configured glob patterns; events from disallowed peers or
/// carrying disallowed kinds are dropped before conversion.
pub struct PeerFilter {
    apps: GlobSet,
    kinds: GlobSet,
}

impl PeerFilter {
    /// Build a filter from glob patterns. `["*"]` accepts everything.
    pub fn new(apps: &[String], kinds: &[String]) -> Result<Self> {
        Ok(Self {
            apps: build_glob_set(apps)?,
            kinds: build_glob_set(kinds)?,
        })
    }

    /// A filter that accepts everything.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::new(&["*".to_string()], &["*".to_string()])
            .unwrap_or_else(|_| unreachable!("literal globs always compile"))
    }

    /// Whether an event from `app_id` with classification `kind` passes.
    #[must_use]
    pub fn allows(&self, app_id: Option<&str>, kind: &str) -> bool {
        self.apps.is_match(app_id.unwrap_or_default()) && self.kinds.is_match(kind)
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SyncError::Init(format!("bad allow-list pattern `{pattern}`: {e}")))?;
        let _ = builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SyncError::Init(format!("failed to build allow-list: {e}")))
}

/// A platform transport, polymorphic over emit/pull/subscribe/teardown.
///
/// All methods that touch the native channel are expected to be called
/// under the caller's per-adapter serialization (see the coordinator);
/// [`TransportAdapter::take_events`] is the exception — it drains the
/// append-only inbound queue fed by helper-output tailing and is never
/// blocked by an in-flight emit.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Which channel this adapter owns.
    fn kind(&self) -> TransportKind;

    /// Source tag stamped onto inbound conversions.
    fn source_tag(&self) -> &'static str {
        self.kind().source_tag()
    }

    /// Whether the preferred native facility is in use (`false` while
    /// running on an emulation fallback).
    fn is_native(&self) -> bool;

    /// Publish one record to the channel.
    async fn emit(&self, record: &ContextRecord) -> Result<()>;

    /// Query the channel for externally visible changes.
    async fn pull(&self) -> Result<Vec<Inbound>>;

    /// Propagate a local removal. Returns whether the transport supports
    /// visible deletion (`false` means consumers must rely on expiry).
    async fn retract(&self, id: &str) -> Result<bool>;

    /// Register an external listen scope.
    async fn subscribe(&self, scope: SubscriptionScope) -> Result<SubscriptionHandle>;

    /// Tear down one registration, symmetric with [`subscribe`](Self::subscribe).
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;

    /// Number of currently open registrations.
    fn subscription_count(&self) -> usize;

    /// Crash-triggered helper relaunches so far (0 for helper-less
    /// transports).
    fn helper_relaunches(&self) -> u64 {
        0
    }

    /// Drain inbound changes accumulated by helper-output tailing since the
    /// last drain. Non-blocking.
    fn take_events(&self) -> Vec<Inbound>;

    /// Best-effort teardown of helpers and registrations.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tags_are_distinct() {
        let tags = [
            TransportKind::NotifyBus.source_tag(),
            TransportKind::NativeApi.source_tag(),
            TransportKind::BusSocket.source_tag(),
        ];
        let mut deduped = tags.to_vec();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), tags.len());
    }

    #[test]
    fn scope_tokens() {
        assert_eq!(SubscriptionScope::SystemWide.as_token(), "system");
        assert_eq!(
            SubscriptionScope::App("com.example.editor".into()).as_token(),
            "app:com.example.editor"
        );
    }

    #[test]
    fn filter_wildcard_allows_everything() {
        let filter = PeerFilter::allow_all();
        assert!(filter.allows(Some("com.anything"), "focus"));
        assert!(filter.allows(None, "gesture"));
    }

    #[test]
    fn filter_explicit_app_list() {
        let filter = PeerFilter::new(
            &["com.example.*".to_string()],
            &["*".to_string()],
        )
        .unwrap();
        assert!(filter.allows(Some("com.example.editor"), "focus"));
        assert!(!filter.allows(Some("org.other.app"), "focus"));
        // Unknown producer never matches a non-wildcard app list.
        assert!(!filter.allows(None, "focus"));
    }

    #[test]
    fn filter_kind_list() {
        let filter = PeerFilter::new(
            &["*".to_string()],
            &["focus".to_string(), "intent.*".to_string()],
        )
        .unwrap();
        assert!(filter.allows(Some("com.a"), "focus"));
        assert!(filter.allows(Some("com.a"), "intent.open_file"));
        assert!(!filter.allows(Some("com.a"), "gesture"));
    }

    #[test]
    fn filter_bad_pattern_is_init_error() {
        let err = PeerFilter::new(&["[".to_string()], &["*".to_string()]);
        assert!(matches!(err, Err(SyncError::Init(_))));
    }
}

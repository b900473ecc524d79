//! Message-bus / direct-socket transport (Linux-style).
//!
//! A companion context service owns the bus registration and exposes
//! add/update/remove/query to local clients. The real client speaks
//! newline-delimited JSON over a Unix socket; [`InProcessBus`] serves the
//! identical [`BusService`] interface in constrained and test environments,
//! keeping the coordinator transport-agnostic.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use synapse_core::{ContextRecord, Provenance, Result, SyncError, identity};
#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::adapter::{
    Inbound, PeerFilter, SubscriptionHandle, SubscriptionScope, TransportAdapter, TransportKind,
};

/// Per-call socket budget.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// One shared item as the companion service stores it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusItem {
    /// Service-wide key (the producer's correlation id).
    pub key: String,
    /// Producer application id.
    pub owner: String,
    /// Producer display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    /// Classification string.
    pub kind: String,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub body: serde_json::Map<String, serde_json::Value>,
    /// RFC 3339 last-update time.
    pub updated_at: String,
    /// Optional RFC 3339 expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Relevance score in [0, 1] (maps to confidence).
    #[serde(default)]
    pub score: f64,
    /// Ordering hint.
    #[serde(default)]
    pub priority: i32,
    /// Filtering tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

/// Local→external mapping. The record id becomes the service key, so
/// repeated emits of the same record update in place.
#[must_use]
pub fn item_from_record(record: &ContextRecord) -> BusItem {
    BusItem {
        key: record.id.clone(),
        owner: identity::APP_ID.to_string(),
        owner_name: Some(identity::APP_NAME.to_string()),
        kind: record.kind.clone(),
        body: record.data.clone(),
        updated_at: record.timestamp.clone(),
        expires_at: record.expires_at.clone(),
        score: record.confidence,
        priority: record.priority,
        tags: record.tags.clone(),
    }
}

/// External→local mapping. Derives the local id from the service key and
/// stamps the adapter's source tag.
#[must_use]
pub fn record_from_item(item: &BusItem) -> ContextRecord {
    ContextRecord {
        id: identity::derive_external_id(
            Some(item.key.as_str()),
            &item.owner,
            &item.kind,
            &item.updated_at,
        ),
        source: TransportKind::BusSocket.source_tag().to_string(),
        kind: item.kind.clone(),
        data: item.body.clone(),
        timestamp: item.updated_at.clone(),
        expires_at: item.expires_at.clone(),
        priority: item.priority,
        confidence: item.score,
        tags: item.tags.clone(),
        metadata: Provenance {
            source_app_id: Some(item.owner.clone()),
            source_app_name: item.owner_name.clone(),
            external_id: Some(item.key.clone()),
        },
    }
}

/// The companion service interface: add/update/remove/query plus a
/// liveness ping used by the startup capability probe.
#[async_trait]
pub trait BusService: Send + Sync {
    /// Liveness check.
    async fn ping(&self) -> Result<()>;
    /// Insert a new item. Fails if the key exists.
    async fn add(&self, item: BusItem) -> Result<()>;
    /// Replace an existing item. Returns `false` if the key is absent.
    async fn update(&self, item: BusItem) -> Result<bool>;
    /// Remove an item. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;
    /// All items currently visible on the service.
    async fn query(&self) -> Result<Vec<BusItem>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Socket client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum BusRequest<'a> {
    Ping,
    Add { item: &'a BusItem },
    Update { item: &'a BusItem },
    Remove { key: &'a str },
    Query,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BusResponse {
    ok: bool,
    found: Option<bool>,
    items: Option<Vec<BusItem>>,
    error: Option<String>,
}

impl Default for BusResponse {
    fn default() -> Self {
        Self {
            ok: false,
            found: None,
            items: None,
            error: None,
        }
    }
}

/// Newline-delimited-JSON client for the companion service socket.
///
/// Each call opens a fresh connection; the coordinator already serializes
/// transport calls, so there is nothing to pool.
#[cfg(unix)]
pub struct SocketBusClient {
    path: PathBuf,
}

#[cfg(unix)]
impl SocketBusClient {
    /// Client for the service socket at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn call(&self, operation: &str, request: &BusRequest<'_>) -> Result<BusResponse> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.path).await?;
            let mut line = serde_json::to_string(request)?;
            line.push('\n');
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await?;

            let mut reader = BufReader::new(stream);
            let mut response_line = String::new();
            let _ = reader.read_line(&mut response_line).await?;
            let response: BusResponse = serde_json::from_str(response_line.trim())?;
            Ok::<BusResponse, SyncError>(response)
        };
        let response = tokio::time::timeout(CALL_TIMEOUT, exchange)
            .await
            .map_err(|_| SyncError::transport(operation, "service call timed out"))??;
        if response.ok {
            Ok(response)
        } else {
            Err(SyncError::transport(
                operation,
                response.error.unwrap_or_else(|| "service refused".into()),
            ))
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl BusService for SocketBusClient {
    async fn ping(&self) -> Result<()> {
        let _ = self.call("ping", &BusRequest::Ping).await?;
        Ok(())
    }

    async fn add(&self, item: BusItem) -> Result<()> {
        let _ = self.call("add", &BusRequest::Add { item: &item }).await?;
        Ok(())
    }

    async fn update(&self, item: BusItem) -> Result<bool> {
        let response = self
            .call("update", &BusRequest::Update { item: &item })
            .await?;
        Ok(response.found.unwrap_or(false))
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let response = self.call("remove", &BusRequest::Remove { key }).await?;
        Ok(response.found.unwrap_or(false))
    }

    async fn query(&self) -> Result<Vec<BusItem>> {
        let response = self.call("query", &BusRequest::Query).await?;
        Ok(response.items.unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-process stand-in
// ─────────────────────────────────────────────────────────────────────────────

/// In-process [`BusService`] stand-in for constrained and test environments.
#[derive(Default)]
pub struct InProcessBus {
    items: Mutex<HashMap<String, BusItem>>,
}

impl InProcessBus {
    /// Create an empty stand-in.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the stand-in holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl BusService for InProcessBus {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn add(&self, item: BusItem) -> Result<()> {
        let mut items = self.items.lock();
        if items.contains_key(&item.key) {
            return Err(SyncError::transport(
                "add",
                format!("key already exists: {}", item.key),
            ));
        }
        let _ = items.insert(item.key.clone(), item);
        Ok(())
    }

    async fn update(&self, item: BusItem) -> Result<bool> {
        let mut items = self.items.lock();
        if !items.contains_key(&item.key) {
            return Ok(false);
        }
        let _ = items.insert(item.key.clone(), item);
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.items.lock().remove(key).is_some())
    }

    async fn query(&self) -> Result<Vec<BusItem>> {
        Ok(self.items.lock().values().cloned().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Bus/socket transport adapter.
pub struct BusSocketAdapter {
    service: Arc<dyn BusService>,
    native: bool,
    filter: PeerFilter,
    subs: Mutex<HashMap<u64, SubscriptionHandle>>,
    next_sub_id: AtomicU64,
}

impl BusSocketAdapter {
    /// Probe the companion service socket once; fall back to the in-process
    /// stand-in when it does not answer (or when emulation is forced).
    pub async fn connect(socket_path: PathBuf, emulation: bool, filter: PeerFilter) -> Self {
        if emulation {
            debug!("emulation mode, using in-process context service");
            return Self::with_service(Arc::new(InProcessBus::new()), false, filter);
        }
        #[cfg(unix)]
        {
            let client = SocketBusClient::new(socket_path.clone());
            match client.ping().await {
                Ok(()) => Self::with_service(Arc::new(client), true, filter),
                Err(e) => {
                    warn!(path = %socket_path.display(), error = %e,
                        "context service unreachable, using in-process stand-in");
                    Self::with_service(Arc::new(InProcessBus::new()), false, filter)
                }
            }
        }
        #[cfg(not(unix))]
        {
            warn!(path = %socket_path.display(), "socket transport unsupported on this platform");
            Self::with_service(Arc::new(InProcessBus::new()), false, filter)
        }
    }

    /// Build over an explicit service implementation.
    #[must_use]
    pub fn with_service(service: Arc<dyn BusService>, native: bool, filter: PeerFilter) -> Self {
        Self {
            service,
            native,
            filter,
            subs: Mutex::new(HashMap::new()),
            next_sub_id: AtomicU64::new(1),
        }
    }

    /// The underlying service (used by status reporting and tests).
    #[must_use]
    pub fn service(&self) -> Arc<dyn BusService> {
        Arc::clone(&self.service)
    }
}

#[async_trait]
impl TransportAdapter for BusSocketAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::BusSocket
    }

    fn is_native(&self) -> bool {
        self.native
    }

    async fn emit(&self, record: &ContextRecord) -> Result<()> {
        let item = item_from_record(record);
        if !self.service.update(item.clone()).await? {
            self.service.add(item).await?;
        }
        Ok(())
    }

    async fn pull(&self) -> Result<Vec<Inbound>> {
        let items = self.service.query().await?;
        Ok(items
            .iter()
            .filter(|item| item.owner != identity::APP_ID)
            .filter(|item| {
                let allowed = self.filter.allows(Some(&item.owner), &item.kind);
                if !allowed {
                    debug!(owner = %item.owner, kind = %item.kind,
                        "dropping item from disallowed peer");
                }
                allowed
            })
            .map(|item| Inbound::Upsert(record_from_item(item)))
            .collect())
    }

    async fn retract(&self, id: &str) -> Result<bool> {
        let _ = self.service.remove(id).await?;
        Ok(true)
    }

    async fn subscribe(&self, scope: SubscriptionScope) -> Result<SubscriptionHandle> {
        // The service delivers through query; registration is adapter-local
        // bookkeeping so teardown stays symmetric.
        let handle = SubscriptionHandle {
            id: self.next_sub_id.fetch_add(1, Ordering::Relaxed),
            token: scope.as_token(),
            scope,
        };
        let _ = self.subs.lock().insert(handle.id, handle.clone());
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let _ = self.subs.lock().remove(&handle.id);
        Ok(())
    }

    fn subscription_count(&self) -> usize {
        self.subs.lock().len()
    }

    fn take_events(&self) -> Vec<Inbound> {
        Vec::new()
    }

    async fn shutdown(&self) {
        self.subs.lock().clear();
    }
}

//! Reconciliation: the periodic pull+push pass and the shared sync logic
//! it exercises.
//!
//! Each tick: (a) pull — drain tailed inbound events, query the transport
//! for externally visible records, and upsert each into the local store
//! (get-or-create then merge-update); (b) push — query the store for
//! outbound-eligible records (confidence at/above threshold, newest first,
//! bounded batch), skip anything tagged with this adapter's own source, and
//! emit the rest. Per-tick errors are logged and counted, never abort the
//! loop; re-processing the same external record is safe because upserts key
//! on the derived id.

use std::sync::Arc;
use std::time::Duration;

use synapse_core::{ContextRecord, Result};
use synapse_store::{ContextQuery, ContextStore, SortBy, SortOrder, StoreEvent};
use synapse_transport::{Inbound, TransportAdapter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gate::TransportGate;
use crate::metrics::SyncMetrics;

/// Everything one sync direction needs: shared by the scheduled loop and
/// the event-driven store listener.
pub(crate) struct SyncContext {
    pub(crate) store: Arc<dyn ContextStore>,
    pub(crate) adapter: Arc<dyn TransportAdapter>,
    pub(crate) gate: Arc<TransportGate>,
    pub(crate) metrics: Arc<SyncMetrics>,
    /// Origin tag stamped on every store mutation this coordinator makes,
    /// and matched against incoming change events to suppress echoes.
    pub(crate) origin: String,
    pub(crate) min_confidence: f64,
    pub(crate) batch_limit: usize,
}

impl SyncContext {
    /// One full reconciliation pass with error isolation: each phase logs
    /// and counts its failure, the tick always completes.
    pub(crate) async fn tick(&self) {
        if let Err(e) = self.pull_phase().await {
            self.metrics.record_error();
            warn!(operation = "pull", error = %e, "reconcile pull failed");
        }
        if let Err(e) = self.push_phase().await {
            self.metrics.record_error();
            warn!(operation = "push", error = %e, "reconcile push failed");
        }
        self.metrics.record_tick();
    }

    /// One full pass that propagates failure — used only for the initial
    /// pass, whose success gates `Ready`.
    pub(crate) async fn initial_pass(&self) -> Result<()> {
        self.pull_phase().await?;
        self.push_phase().await?;
        self.metrics.record_tick();
        Ok(())
    }

    async fn pull_phase(&self) -> Result<()> {
        let inbound = {
            let _guard = self.gate.acquire().await?;
            self.metrics.record_call();
            let mut changes = self.adapter.take_events();
            changes.extend(self.adapter.pull().await?);
            changes
        };
        for change in inbound {
            match change {
                Inbound::Upsert(record) => {
                    if let Err(e) = self.upsert(record).await {
                        warn!(operation = "upsert", error = %e, "failed to apply inbound record");
                    }
                }
                Inbound::Remove(id) => {
                    if let Err(e) = self.store.remove_context(&id, Some(&self.origin)).await {
                        warn!(operation = "remove", id, error = %e, "failed to apply inbound removal");
                    }
                }
            }
        }
        Ok(())
    }

    /// Get-or-create then merge-update, keyed on the derived id. Delivering
    /// the same external event twice converges on one record.
    async fn upsert(&self, record: ContextRecord) -> Result<()> {
        let existing = self.store.get_context(&record.id).await?;
        if existing.is_some() {
            let _ = self
                .store
                .update_context(&record.id, record.as_patch(), Some(&self.origin))
                .await?;
        } else {
            self.store
                .add_context(record, Some(&self.origin))
                .await?;
        }
        self.metrics.record_received();
        Ok(())
    }

    async fn push_phase(&self) -> Result<()> {
        let candidates = self
            .store
            .query_contexts(&ContextQuery {
                min_confidence: Some(self.min_confidence),
                sort_by: SortBy::Timestamp,
                sort_order: SortOrder::Descending,
                limit: Some(self.batch_limit),
            })
            .await?;

        for record in &candidates {
            // Loop prevention: never re-push what this adapter brought in.
            if record.source == self.adapter.source_tag() {
                continue;
            }
            let guard = self.gate.acquire().await?;
            self.metrics.record_call();
            match self.adapter.emit(record).await {
                Ok(()) => self.metrics.record_sent(),
                Err(e) => {
                    self.metrics.record_error();
                    warn!(operation = "emit", id = %record.id, error = %e, "push failed");
                }
            }
            drop(guard);
        }
        Ok(())
    }

    /// React to one local store change event (the event-driven outbound
    /// path). Echo-guarded by origin tag, loop-guarded by source tag,
    /// confidence-gated like the scheduled push.
    pub(crate) async fn handle_store_event(&self, event: StoreEvent) {
        if event.origin() == Some(self.origin.as_str()) {
            return;
        }
        match event {
            StoreEvent::Added { record, .. } | StoreEvent::Updated { record, .. } => {
                if record.source == self.adapter.source_tag() {
                    debug!(id = %record.id, "skipping externally sourced record");
                    return;
                }
                if record.confidence < self.min_confidence {
                    debug!(id = %record.id, confidence = record.confidence,
                        "below push threshold, not emitting");
                    return;
                }
                let Ok(guard) = self.gate.acquire().await.inspect_err(|e| {
                    self.metrics.record_error();
                    warn!(operation = "emit", error = %e, "transport gate unavailable");
                }) else {
                    return;
                };
                self.metrics.record_call();
                match self.adapter.emit(&record).await {
                    Ok(()) => self.metrics.record_sent(),
                    Err(e) => {
                        self.metrics.record_error();
                        warn!(operation = "emit", id = %record.id, error = %e, "event push failed");
                    }
                }
                drop(guard);
            }
            StoreEvent::Removed { id, .. } => {
                let Ok(guard) = self.gate.acquire().await else {
                    self.metrics.record_error();
                    return;
                };
                self.metrics.record_call();
                match self.adapter.retract(&id).await {
                    Ok(true) => debug!(id, "removal propagated"),
                    Ok(false) => debug!(id, "transport cannot propagate removal, relying on expiry"),
                    Err(e) => {
                        self.metrics.record_error();
                        warn!(operation = "retract", id, error = %e, "removal propagation failed");
                    }
                }
                drop(guard);
            }
        }
    }
}

/// Spawn the fixed-cadence reconciliation loop.
///
/// The in-flight tick always finishes — cancellation is only observed
/// between ticks, so `shutdown()` can await the handle to drain.
pub(crate) fn spawn_loop(
    ctx: Arc<SyncContext>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The interval's first tick completes immediately; the initial pass
        // already ran during initialization.
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ctx.tick().await;
                }
                () = cancel.cancelled() => break,
            }
            if cancel.is_cancelled() {
                break;
            }
        }
        debug!("reconcile loop stopped");
    })
}

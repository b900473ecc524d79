//! Sync counters.
//!
//! Every increment updates both the internal atomics (surfaced by
//! `status()`) and the process-wide `metrics` recorder, so hosts that wire
//! an exporter see the same numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

/// Internal counters for one coordinator.
#[derive(Default)]
pub struct SyncMetrics {
    contexts_sent: AtomicU64,
    contexts_received: AtomicU64,
    transport_calls: AtomicU64,
    transport_errors: AtomicU64,
    ticks_completed: AtomicU64,
}

impl SyncMetrics {
    /// Fresh zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One record emitted outbound.
    pub fn record_sent(&self) {
        let _ = self.contexts_sent.fetch_add(1, Ordering::Relaxed);
        counter!("synapse_contexts_sent_total").increment(1);
    }

    /// One record received inbound and applied to the store.
    pub fn record_received(&self) {
        let _ = self.contexts_received.fetch_add(1, Ordering::Relaxed);
        counter!("synapse_contexts_received_total").increment(1);
    }

    /// One call made against the transport.
    pub fn record_call(&self) {
        let _ = self.transport_calls.fetch_add(1, Ordering::Relaxed);
        counter!("synapse_transport_calls_total").increment(1);
    }

    /// One failed transport call.
    pub fn record_error(&self) {
        let _ = self.transport_errors.fetch_add(1, Ordering::Relaxed);
        counter!("synapse_transport_errors_total").increment(1);
    }

    /// One reconciliation tick finished (successfully or not).
    pub fn record_tick(&self) {
        let _ = self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        counter!("synapse_reconcile_ticks_total").increment(1);
    }

    /// Ticks completed so far.
    #[must_use]
    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    /// Point-in-time snapshot. `helper_relaunches` comes from the adapter.
    #[must_use]
    pub fn snapshot(&self, helper_relaunches: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            contexts_sent: self.contexts_sent.load(Ordering::Relaxed),
            contexts_received: self.contexts_received.load(Ordering::Relaxed),
            transport_calls: self.transport_calls.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            helper_relaunches,
        }
    }
}

/// Serializable snapshot for `status()`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Records emitted outbound.
    pub contexts_sent: u64,
    /// Records received inbound.
    pub contexts_received: u64,
    /// Transport calls made.
    pub transport_calls: u64,
    /// Transport calls failed.
    pub transport_errors: u64,
    /// Reconciliation ticks completed.
    pub ticks_completed: u64,
    /// Crash-triggered helper relaunches.
    pub helper_relaunches: u64,
}

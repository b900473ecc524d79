//! Coordinator lifecycle state machine and status reporting.

use serde::Serialize;

use crate::metrics::MetricsSnapshot;

/// Coordinator lifecycle.
///
/// `Uninitialized → Initializing → Ready | Degraded → ShuttingDown → Stopped`.
/// `Degraded` replaces `Ready` when the preferred native transport is
/// unavailable and an emulation channel is serving the contract instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, `initialize()` not yet called.
    Uninitialized,
    /// Capability probe / transport construction / first pass in progress.
    Initializing,
    /// Operating on the preferred native transport.
    Ready,
    /// Operating on an emulation fallback; weaker delivery guarantees.
    Degraded,
    /// `shutdown()` in progress; no new ticks are scheduled.
    ShuttingDown,
    /// Fully torn down.
    Stopped,
}

impl LifecycleState {
    /// Short string form for logs and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the coordinator is serving the public contract.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

/// Snapshot returned by `SyncCoordinator::status()`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Whether `initialize()` has completed and `shutdown()` has not.
    pub initialized: bool,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Whether an emulation fallback is serving instead of the preferred
    /// native transport.
    pub degraded: bool,
    /// Open external listen registrations.
    pub subscriptions: usize,
    /// Counter snapshot.
    pub metrics: MetricsSnapshot,
}

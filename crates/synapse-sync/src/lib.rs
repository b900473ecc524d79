//! # synapse-sync
//!
//! The synchronization coordinator and reconciliation loop.
//!
//! - **[`coordinator::SyncCoordinator`]**: the adapter's public object.
//!   Wires local-store change events to outbound pushes, inbound receipts
//!   to local-store mutation, and owns startup/shutdown and crash recovery
//!   of the transport.
//! - **[`reconcile`]**: the per-adapter scheduled task that pulls
//!   externally visible contexts and pushes qualifying local contexts on a
//!   fixed cadence, stateless beyond its timer.
//! - **[`state::LifecycleState`]**: the coordinator state machine.
//! - **[`metrics::SyncMetrics`]**: counters surfaced by `status()`.
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: synapse-core, synapse-settings,
//! synapse-store, synapse-transport.

#![deny(unsafe_code)]

pub mod coordinator;
pub mod gate;
pub mod metrics;
pub mod reconcile;
pub mod state;

pub use coordinator::SyncCoordinator;
pub use gate::TransportGate;
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use state::{LifecycleState, SyncStatus};

//! # synapse-transport
//!
//! Platform transport adapters for Synapse context sharing.
//!
//! One [`adapter::TransportAdapter`] trait, three implementations, each
//! owning exactly one native channel:
//!
//! - **[`notify::NotifyBusAdapter`]**: distributed notification bus.
//!   Posts via a short-lived helper, receives via a supervised long-lived
//!   listener helper tailed for JSON payloads.
//! - **[`native::NativeApiAdapter`]**: first-party context API behind a
//!   command-line automation host. Probed once at startup; falls back to
//!   the notification-bus pattern when the host is absent.
//! - **[`bus::BusSocketAdapter`]**: companion context service reachable
//!   over a Unix socket, with an in-process stand-in serving the identical
//!   interface for constrained and test environments.
//!
//! Subprocess plumbing lives here too: [`runner::CommandRunner`] for
//! short-lived helper invocations, [`supervisor::HelperSupervisor`] for
//! long-lived helpers (exit watch, capped-backoff relaunch, output
//! tailing), and [`artifacts::StagingArea`] for transient helper files.
//!
//! ## Crate Position
//!
//! Depends on: synapse-core, synapse-settings.
//! Depended on by: synapse-sync.

#![deny(unsafe_code)]

pub mod adapter;
pub mod artifacts;
pub mod bus;
pub mod factory;
pub mod native;
pub mod notify;
pub mod runner;
pub mod supervisor;

pub use adapter::{
    Inbound, PeerFilter, SubscriptionHandle, SubscriptionScope, TransportAdapter, TransportKind,
};
pub use factory::{build_adapter, build_platform_adapter, platform_kind};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
pub use supervisor::{BackoffPolicy, HelperSpec, HelperSupervisor};

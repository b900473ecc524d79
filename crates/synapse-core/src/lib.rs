//! # synapse-core
//!
//! Foundation types for Synapse, the OS context-sharing layer of the agent.
//!
//! This crate provides the shared vocabulary that all other Synapse crates
//! depend on:
//!
//! - **Context records**: [`record::ContextRecord`], the canonical unit
//!   exchanged with other applications, and [`record::ContextPatch`] with
//!   merge-update semantics
//! - **Identity**: [`identity`] — application identity constants and
//!   deterministic external→local id derivation
//! - **Errors**: [`errors::SyncError`] hierarchy via `thiserror`
//! - **Logging**: [`logging::init_logging`] tracing-subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other synapse crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod logging;
pub mod record;

pub use errors::{Result, SyncError};
pub use record::{ContextPatch, ContextRecord, Provenance};

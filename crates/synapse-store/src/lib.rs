//! # synapse-store
//!
//! The local context store collaborator.
//!
//! The store is the single source of truth for outbound context and a
//! transparent pass-through for inbound context. This crate owns the small
//! documented interface the sync layer consumes:
//!
//! - **[`ContextStore`]**: async trait with get/add/update/remove/query
//! - **[`StoreEvent`]**: change events (`Added`/`Updated`/`Removed`) over a
//!   broadcast channel, each carrying the origin tag of the mutation so a
//!   listener never re-processes a change it caused itself
//! - **[`ContextQuery`]**: confidence/sort/limit query parameters
//! - **[`MemoryContextStore`]**: in-memory reference implementation
//!
//! ## Crate Position
//!
//! Depends on: synapse-core. Depended on by: synapse-sync.

#![deny(unsafe_code)]

pub mod memory;
pub mod query;

pub use memory::MemoryContextStore;
pub use query::{ContextQuery, SortBy, SortOrder};

use async_trait::async_trait;
use synapse_core::{ContextPatch, ContextRecord, Result};
use tokio::sync::broadcast;

/// A change notification from the store.
///
/// `origin` is the tag the mutating caller passed in; the sync coordinator
/// passes its own tag and skips events that carry it back.
#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// A record was added.
    Added {
        /// The new record.
        record: ContextRecord,
        /// Mutation origin tag.
        origin: Option<String>,
    },
    /// A record was merge-updated.
    Updated {
        /// The record after the update.
        record: ContextRecord,
        /// Mutation origin tag.
        origin: Option<String>,
    },
    /// A record was removed.
    Removed {
        /// Id of the removed record.
        id: String,
        /// Mutation origin tag.
        origin: Option<String>,
    },
}

impl StoreEvent {
    /// The origin tag of the mutation that produced this event.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        match self {
            Self::Added { origin, .. }
            | Self::Updated { origin, .. }
            | Self::Removed { origin, .. } => origin.as_deref(),
        }
    }
}

/// The local context store interface consumed by the sync layer.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Fetch a record by id.
    async fn get_context(&self, id: &str) -> Result<Option<ContextRecord>>;

    /// Insert a record. Fails if the id already exists.
    async fn add_context(&self, record: ContextRecord, origin: Option<&str>) -> Result<()>;

    /// Merge-update an existing record (present patch fields overwrite,
    /// absent fields persist). Returns the record after the update.
    async fn update_context(
        &self,
        id: &str,
        patch: ContextPatch,
        origin: Option<&str>,
    ) -> Result<ContextRecord>;

    /// Remove a record. Returns whether it existed.
    async fn remove_context(&self, id: &str, origin: Option<&str>) -> Result<bool>;

    /// Query records with confidence filtering, sorting, and a limit.
    async fn query_contexts(&self, query: &ContextQuery) -> Result<Vec<ContextRecord>>;

    /// Subscribe to change events emitted after this call.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

//! In-memory reference implementation of [`ContextStore`].
//!
//! Backs the sync layer in tests and in constrained environments where the
//! host has not wired a persistent store. Change events are broadcast
//! non-blocking; slow receivers lag rather than blocking mutations.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use synapse_core::{ContextPatch, ContextRecord, Result, SyncError};
use tokio::sync::broadcast;

use crate::query::ContextQuery;
use crate::{ContextStore, StoreEvent};

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// In-memory [`ContextStore`].
pub struct MemoryContextStore {
    records: RwLock<HashMap<String, ContextRecord>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryContextStore {
    /// Create an empty store with the default event channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty store with a custom event channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            records: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn emit(&self, event: StoreEvent) {
        // send only fails when there are no receivers, which is fine.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn get_context(&self, id: &str) -> Result<Option<ContextRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn add_context(&self, record: ContextRecord, origin: Option<&str>) -> Result<()> {
        {
            let mut records = self.records.write();
            if records.contains_key(&record.id) {
                return Err(SyncError::Store(format!(
                    "record already exists: {}",
                    record.id
                )));
            }
            let _ = records.insert(record.id.clone(), record.clone());
        }
        self.emit(StoreEvent::Added {
            record,
            origin: origin.map(String::from),
        });
        Ok(())
    }

    async fn update_context(
        &self,
        id: &str,
        patch: ContextPatch,
        origin: Option<&str>,
    ) -> Result<ContextRecord> {
        let updated = {
            let mut records = self.records.write();
            let record = records
                .get_mut(id)
                .ok_or_else(|| SyncError::Store(format!("record not found: {id}")))?;
            record.apply(&patch);
            record.clone()
        };
        self.emit(StoreEvent::Updated {
            record: updated.clone(),
            origin: origin.map(String::from),
        });
        Ok(updated)
    }

    async fn remove_context(&self, id: &str, origin: Option<&str>) -> Result<bool> {
        let removed = self.records.write().remove(id).is_some();
        if removed {
            self.emit(StoreEvent::Removed {
                id: id.to_string(),
                origin: origin.map(String::from),
            });
        }
        Ok(removed)
    }

    async fn query_contexts(&self, query: &ContextQuery) -> Result<Vec<ContextRecord>> {
        let snapshot: Vec<ContextRecord> = self.records.read().values().cloned().collect();
        Ok(query.apply(snapshot))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

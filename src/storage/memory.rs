//! In-memory storage engine.

use super::{order_and_limit, EventFilter, SaveOutcome, Storage, StorageKind};
use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// Events held in a map keyed by id. Used by tests and throwaway relays.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    events: Arc<RwLock<HashMap<String, Event>>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether the store holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn save_event(&self, event: &Event) -> Result<SaveOutcome> {
        let mut events = self.events.write();
        match events.entry(event.id.clone()) {
            Entry::Occupied(_) => Ok(SaveOutcome::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
                Ok(SaveOutcome::Stored)
            }
        }
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let matched = self
            .events
            .read()
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(order_and_limit(matched, filter.limit))
    }

    async fn delete_event(&self, id: &str, pubkey: &str) -> Result<u64> {
        let mut events = self.events.write();
        if events.get(id).is_some_and(|e| e.pubkey == pubkey) {
            events.remove(id);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn purge_before(&self, cutoff: u64) -> Result<u64> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|_, e| e.created_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

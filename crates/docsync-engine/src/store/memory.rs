// File: src/store/memory.rs
//
// In-memory event store backend

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use docsync_core::{Event, SyncError, SyncResult, VectorClock};

use super::EventStore;

/// Process-local event store.
///
/// The per-instance sequence lock serializes appends that need sequence
/// assignment; queries proceed concurrently and observe only committed
/// records. The `(document_id, sequence_num)` and `event_id` uniqueness
/// checks play the role a unique index plays in a database backend.
pub struct MemoryEventStore {
    events: RwLock<HashMap<String, Vec<Event>>>,
    event_ids: RwLock<HashSet<Uuid>>,
    sequence_lock: Mutex<()>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            event_ids: RwLock::new(HashSet::new()),
            sequence_lock: Mutex::new(()),
        }
    }

    async fn insert(&self, mut event: Event) -> SyncResult<Event> {
        if event.event_id.is_nil() {
            event.event_id = Uuid::new_v4();
        }
        if event.timestamp == DateTime::<Utc>::UNIX_EPOCH {
            event.timestamp = Utc::now();
        }

        if event.sequence_num == 0 {
            let events = self.events.read().await;
            let max = events
                .get(&event.document_id)
                .and_then(|log| log.iter().map(|e| e.sequence_num).max())
                .unwrap_or(0);
            event.sequence_num = max + 1;
        }

        let mut event_ids = self.event_ids.write().await;
        if event_ids.contains(&event.event_id) {
            return Err(SyncError::duplicate_key(format!(
                "event_id {} already stored",
                event.event_id
            )));
        }

        let mut events = self.events.write().await;
        let log = events.entry(event.document_id.clone()).or_default();
        if log.iter().any(|e| e.sequence_num == event.sequence_num) {
            return Err(SyncError::duplicate_key(format!(
                "({}, {}) already stored",
                event.document_id, event.sequence_num
            )));
        }

        event_ids.insert(event.event_id);
        log.push(event.clone());
        Ok(event)
    }

    async fn collect<F>(&self, document_id: &str, mut keep: F) -> Vec<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        let events = self.events.read().await;
        events
            .get(document_id)
            .map(|log| log.iter().filter(|e| keep(e)).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: Event) -> SyncResult<Event> {
        let _guard = self.sequence_lock.lock().await;
        self.insert(event).await
    }

    async fn append_batch(&self, events: Vec<Event>) -> SyncResult<Vec<Event>> {
        let _guard = self.sequence_lock.lock().await;
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            stored.push(self.insert(event).await?);
        }
        Ok(stored)
    }

    async fn events_after_sequence(
        &self,
        document_id: &str,
        after_sequence: i64,
    ) -> SyncResult<Vec<Event>> {
        let mut result = self
            .collect(document_id, |e| e.sequence_num > after_sequence)
            .await;
        result.sort_by_key(|e| e.sequence_num);
        Ok(result)
    }

    async fn events_after_version(
        &self,
        document_id: &str,
        after_version: i64,
    ) -> SyncResult<Vec<Event>> {
        let mut result = self
            .collect(document_id, |e| e.server_seq > after_version)
            .await;
        result.sort_by_key(|e| (e.server_seq, e.sequence_num));
        Ok(result)
    }

    async fn latest_sequence(&self, document_id: &str) -> SyncResult<i64> {
        let events = self.events.read().await;
        Ok(events
            .get(document_id)
            .and_then(|log| log.iter().map(|e| e.sequence_num).max())
            .unwrap_or(0))
    }

    async fn latest_version(&self, document_id: &str) -> SyncResult<i64> {
        let events = self.events.read().await;
        Ok(events
            .get(document_id)
            .and_then(|log| log.iter().map(|e| e.server_seq).max())
            .unwrap_or(0))
    }

    async fn events_by_vector_clock(
        &self,
        document_id: &str,
        clock: &VectorClock,
    ) -> SyncResult<Vec<Event>> {
        let mut result = self
            .collect(document_id, |e| {
                !clock.contains(&e.client_id) || e.sequence_num > clock.get(&e.client_id)
            })
            .await;
        result.sort_by_key(|e| e.sequence_num);
        Ok(result)
    }
}

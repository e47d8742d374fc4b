// File: src/state_vector/mod.rs
//
// Per-(client, document) cursor persistence and missing-event lookup

pub mod memory;

pub use memory::MemoryStateVectorStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use docsync_core::{Event, StateVector, SyncResult, VectorClock};

use crate::store::EventStore;

/// Persistence interface for state vectors. One record per
/// `(client_id, document_id)`, enforced by the backend.
#[async_trait]
pub trait StateVectorStore: Send + Sync {
    /// Atomic upsert-and-read: a missing record is inserted with an empty
    /// clock, then the current record is returned. Two concurrent first
    /// reads must not race to insert duplicates.
    async fn get_or_create(&self, client_id: &str, document_id: &str) -> SyncResult<StateVector>;

    /// Overwrite the clock and `last_updated`, preserving the record id.
    async fn upsert(&self, state_vector: StateVector) -> SyncResult<StateVector>;

    /// Delete every record for the client, across all documents.
    async fn delete_client(&self, client_id: &str) -> SyncResult<usize>;
}

/// Tracks what each client has consumed and computes what it has not.
pub struct StateVectorManager {
    store: Arc<dyn StateVectorStore>,
    events: Arc<dyn EventStore>,
    // Registry of per-(client, document) locks guarding the merge
    // read-modify-write. A single manager instance must be authoritative for
    // these; distributed deployments need the merge pushed into the backend
    // as an atomic per-key-maximum operation.
    merge_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StateVectorManager {
    pub fn new(store: Arc<dyn StateVectorStore>, events: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            events,
            merge_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Current record for the pair, created with an empty clock when absent.
    pub async fn get(&self, client_id: &str, document_id: &str) -> SyncResult<StateVector> {
        self.store.get_or_create(client_id, document_id).await
    }

    /// Overwrite semantics; the record id survives.
    pub async fn update(&self, state_vector: StateVector) -> SyncResult<StateVector> {
        self.store.upsert(state_vector).await
    }

    /// Fold a partial clock into the stored one, taking the per-key
    /// maximum. The RMW runs under the pair's merge lock so concurrent
    /// merges cannot lose updates.
    pub async fn merge(
        &self,
        client_id: &str,
        document_id: &str,
        partial: &VectorClock,
    ) -> SyncResult<StateVector> {
        let lock = self.merge_lock(client_id, document_id).await;
        let _guard = lock.lock().await;

        let mut current = self.store.get_or_create(client_id, document_id).await?;
        current.merge(partial);
        self.store.upsert(current).await
    }

    /// Events the client has not yet seen. A nil or empty clock falls back
    /// to the persisted one; an unknown client therefore receives every
    /// event.
    pub async fn missing_events(
        &self,
        client_id: &str,
        document_id: &str,
        clock: Option<&VectorClock>,
    ) -> SyncResult<Vec<Event>> {
        let effective = match clock {
            Some(clock) if !clock.is_empty() => clock.clone(),
            _ => {
                self.store
                    .get_or_create(client_id, document_id)
                    .await?
                    .vector_clock
            }
        };
        self.events
            .events_by_vector_clock(document_id, &effective)
            .await
    }

    /// Registration is observability only; state vectors materialize
    /// lazily on first read or update.
    pub async fn register_client(&self, client_id: &str) {
        info!(client_id, "client registered");
    }

    pub async fn unregister_client(&self, client_id: &str) -> SyncResult<usize> {
        let removed = self.store.delete_client(client_id).await?;
        info!(client_id, removed, "client unregistered");
        Ok(removed)
    }

    async fn merge_lock(&self, client_id: &str, document_id: &str) -> Arc<Mutex<()>> {
        let key = format!("{client_id}/{document_id}");
        let mut locks = self.merge_locks.lock().await;
        locks.entry(key).or_default().clone()
    }
}

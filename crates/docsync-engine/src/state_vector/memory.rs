// File: src/state_vector/memory.rs
//
// In-memory state vector store backend

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use docsync_core::{StateVector, SyncResult};

use super::StateVectorStore;

/// Process-local state vector store keyed by `(client_id, document_id)`.
/// The map key plays the role of the unique index a database backend
/// enforces.
pub struct MemoryStateVectorStore {
    vectors: RwLock<HashMap<(String, String), StateVector>>,
}

impl MemoryStateVectorStore {
    pub fn new() -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateVectorStore for MemoryStateVectorStore {
    async fn get_or_create(&self, client_id: &str, document_id: &str) -> SyncResult<StateVector> {
        let mut vectors = self.vectors.write().await;
        let record = vectors
            .entry((client_id.to_string(), document_id.to_string()))
            .or_insert_with(|| StateVector::new(client_id, document_id));
        Ok(record.clone())
    }

    async fn upsert(&self, state_vector: StateVector) -> SyncResult<StateVector> {
        let mut vectors = self.vectors.write().await;
        let key = (
            state_vector.client_id.clone(),
            state_vector.document_id.clone(),
        );
        let stored = match vectors.get_mut(&key) {
            Some(existing) => {
                existing.vector_clock = state_vector.vector_clock;
                existing.last_updated = Utc::now();
                existing.clone()
            }
            None => {
                vectors.insert(key, state_vector.clone());
                state_vector
            }
        };
        Ok(stored)
    }

    async fn delete_client(&self, client_id: &str) -> SyncResult<usize> {
        let mut vectors = self.vectors.write().await;
        let before = vectors.len();
        vectors.retain(|(client, _), _| client != client_id);
        Ok(before - vectors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_vector::StateVectorManager;
    use crate::store::{EventStore, MemoryEventStore};
    use docsync_core::{Event, Operation, VectorClock};
    use std::sync::Arc;

    fn manager_with_events() -> (StateVectorManager, Arc<MemoryEventStore>) {
        let events = Arc::new(MemoryEventStore::new());
        let manager = StateVectorManager::new(
            Arc::new(MemoryStateVectorStore::new()),
            events.clone(),
        );
        (manager, events)
    }

    #[tokio::test]
    async fn test_get_creates_record_with_empty_clock() {
        let (manager, _) = manager_with_events();
        let sv = manager.get("c1", "d1").await.unwrap();
        assert!(sv.vector_clock.is_empty());

        // Stable identity on re-read.
        let again = manager.get("c1", "d1").await.unwrap();
        assert_eq!(again.state_vector_id, sv.state_vector_id);
    }

    #[tokio::test]
    async fn test_merge_accumulates_per_key_maximum() {
        let (manager, _) = manager_with_events();
        manager
            .merge("c1", "d1", &VectorClock::from([("server", 3), ("c2", 1)]))
            .await
            .unwrap();
        manager
            .merge("c1", "d1", &VectorClock::from([("server", 2), ("c3", 5)]))
            .await
            .unwrap();

        let sv = manager.get("c1", "d1").await.unwrap();
        assert_eq!(sv.vector_clock.get("server"), 3);
        assert_eq!(sv.vector_clock.get("c2"), 1);
        assert_eq!(sv.vector_clock.get("c3"), 5);
    }

    #[tokio::test]
    async fn test_concurrent_merges_do_not_lose_updates() {
        let (manager, _) = manager_with_events();
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for i in 1..=10i64 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .merge("c1", "d1", &VectorClock::single(format!("a{i}"), i))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let sv = manager.get("c1", "d1").await.unwrap();
        assert_eq!(sv.vector_clock.len(), 10);
        for i in 1..=10i64 {
            assert_eq!(sv.vector_clock.get(&format!("a{i}")), i);
        }
    }

    #[tokio::test]
    async fn test_update_overwrites_and_preserves_identity() {
        let (manager, _) = manager_with_events();
        let mut sv = manager.get("c1", "d1").await.unwrap();
        let id = sv.state_vector_id;

        sv.vector_clock = VectorClock::single("server", 9);
        manager.update(sv).await.unwrap();

        let stored = manager.get("c1", "d1").await.unwrap();
        assert_eq!(stored.state_vector_id, id);
        assert_eq!(stored.vector_clock.get("server"), 9);
    }

    #[tokio::test]
    async fn test_unregister_removes_all_documents_for_client() {
        let (manager, _) = manager_with_events();
        manager.get("c1", "d1").await.unwrap();
        manager.get("c1", "d2").await.unwrap();
        manager.get("c2", "d1").await.unwrap();

        let removed = manager.unregister_client("c1").await.unwrap();
        assert_eq!(removed, 2);

        // c2 untouched; c1 records recreated fresh on next read.
        let sv = manager.get("c1", "d1").await.unwrap();
        assert!(sv.vector_clock.is_empty());
        let other = manager.get("c2", "d1").await.unwrap();
        assert_eq!(other.client_id, "c2");
    }

    #[tokio::test]
    async fn test_missing_events_substitutes_stored_clock() {
        let (manager, events) = manager_with_events();
        for client in ["cX", "cX", "cY"] {
            events
                .append(Event::new("d1", Operation::Update, client))
                .await
                .unwrap();
        }
        manager
            .merge("cZ", "d1", &VectorClock::single("cX", 1))
            .await
            .unwrap();

        // Explicit clock wins over the stored one.
        let explicit = manager
            .missing_events("cZ", "d1", Some(&VectorClock::single("cX", 2)))
            .await
            .unwrap();
        assert_eq!(explicit.len(), 1);
        assert_eq!(explicit[0].client_id, "cY");

        // Empty clock falls back to the stored clock {cX: 1}.
        let fallback = manager
            .missing_events("cZ", "d1", Some(&VectorClock::new()))
            .await
            .unwrap();
        let sequences: Vec<i64> = fallback.iter().map(|e| e.sequence_num).collect();
        assert_eq!(sequences, vec![2, 3]);

        // Unknown client with no clock at all sees everything.
        let everything = manager.missing_events("cN", "d1", None).await.unwrap();
        assert_eq!(everything.len(), 3);
    }
}

// File: src/snapshot/memory.rs
//
// In-memory snapshot store backend

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use docsync_core::{Snapshot, SyncResult};

use super::SnapshotStore;

pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Vec<Snapshot>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn insert(&self, snapshot: Snapshot) -> SyncResult<Snapshot> {
        let mut snapshots = self.snapshots.write().await;
        snapshots
            .entry(snapshot.document_id.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(snapshot)
    }

    async fn latest(&self, document_id: &str) -> SyncResult<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(document_id)
            .and_then(|list| {
                list.iter()
                    .max_by_key(|s| (s.version, s.created_at))
            })
            .cloned())
    }

    async fn by_sequence(
        &self,
        document_id: &str,
        max_sequence: i64,
    ) -> SyncResult<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(document_id)
            .and_then(|list| {
                list.iter()
                    .filter(|s| s.sequence_num <= max_sequence)
                    .max_by_key(|s| (s.sequence_num, s.created_at))
            })
            .cloned())
    }

    async fn by_server_seq(
        &self,
        document_id: &str,
        max_server_seq: i64,
    ) -> SyncResult<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(document_id)
            .and_then(|list| {
                list.iter()
                    .filter(|s| s.server_seq <= max_server_seq)
                    .max_by_key(|s| (s.server_seq, s.created_at))
            })
            .cloned())
    }

    async fn delete_before(&self, document_id: &str, sequence_num: i64) -> SyncResult<usize> {
        let mut snapshots = self.snapshots.write().await;
        let Some(list) = snapshots.get_mut(document_id) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|s| s.sequence_num >= sequence_num);
        Ok(before - list.len())
    }

    async fn delete_before_server_seq(
        &self,
        document_id: &str,
        server_seq: i64,
    ) -> SyncResult<usize> {
        let mut snapshots = self.snapshots.write().await;
        let Some(list) = snapshots.get_mut(document_id) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|s| s.server_seq >= server_seq);
        Ok(before - list.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotManager;
    use crate::store::{EventStore, MemoryEventStore};
    use docsync_core::{Event, Operation};
    use serde_json::json;
    use std::sync::Arc;

    fn snapshot(document_id: &str, version: i64, sequence_num: i64) -> Snapshot {
        Snapshot::new(document_id, json!({"v": version}), version)
            .with_sequence_num(sequence_num)
            .with_server_seq(version)
    }

    #[tokio::test]
    async fn test_latest_picks_highest_version() {
        let store = MemorySnapshotStore::new();
        store.insert(snapshot("d1", 5, 5)).await.unwrap();
        store.insert(snapshot("d1", 10, 10)).await.unwrap();
        store.insert(snapshot("d1", 7, 7)).await.unwrap();

        let latest = store.latest("d1").await.unwrap().unwrap();
        assert_eq!(latest.version, 10);
        assert!(store.latest("d2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_by_sequence_is_greatest_at_or_below() {
        let store = MemorySnapshotStore::new();
        for (version, sequence) in [(2, 2), (5, 5), (9, 9)] {
            store.insert(snapshot("d1", version, sequence)).await.unwrap();
        }

        let found = store.by_sequence("d1", 7).await.unwrap().unwrap();
        assert_eq!(found.sequence_num, 5);
        assert!(store.by_sequence("d1", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_by_server_seq_is_greatest_at_or_below() {
        let store = MemorySnapshotStore::new();
        for (version, sequence) in [(3, 2), (6, 5), (12, 9)] {
            store.insert(snapshot("d1", version, sequence)).await.unwrap();
        }

        let found = store.by_server_seq("d1", 10).await.unwrap().unwrap();
        assert_eq!(found.server_seq, 6);
        assert!(store.by_server_seq("d1", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_older_than_retains_anchor() {
        let events: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let manager = SnapshotManager::new(snapshots.clone(), events);

        for (version, sequence) in [(2, 2), (5, 5), (9, 9)] {
            snapshots.insert(snapshot("d1", version, sequence)).await.unwrap();
        }

        let deleted = manager.delete_older_than("d1", 7).await.unwrap();
        assert_eq!(deleted, 1); // only the sequence-2 snapshot

        // Anchor (sequence 5) and the newer snapshot both survive.
        assert!(snapshots.by_sequence("d1", 5).await.unwrap().is_some());
        assert!(snapshots.by_sequence("d1", 9).await.unwrap().is_some());

        // No anchor below the threshold: nothing is deleted.
        let deleted = manager.delete_older_than("d2", 100).await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_delete_older_than_server_seq_retains_anchor() {
        let events: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let manager = SnapshotManager::new(snapshots.clone(), events);

        for (version, sequence) in [(2, 2), (5, 5), (9, 9)] {
            snapshots.insert(snapshot("d1", version, sequence)).await.unwrap();
        }

        // Anchor is the server_seq-5 snapshot; only the older one goes.
        let deleted = manager.delete_older_than_server_seq("d1", 7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(snapshots.by_server_seq("d1", 5).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_captures_event_store_cursor() {
        let events = Arc::new(MemoryEventStore::new());
        for _ in 0..10 {
            events
                .append(Event::new("d1", Operation::Update, "cA"))
                .await
                .unwrap();
        }
        let manager =
            SnapshotManager::new(Arc::new(MemorySnapshotStore::new()), events.clone());

        let snapshot = manager
            .create("d1", json!({"v": 10}), 10, None)
            .await
            .unwrap();
        assert_eq!(snapshot.sequence_num, 10);
        assert_eq!(snapshot.server_seq, 10);

        // Five more events, then replay from the snapshot.
        for _ in 0..5 {
            events
                .append(Event::new("d1", Operation::Update, "cA"))
                .await
                .unwrap();
        }
        let (found, tail) = manager.events_with_snapshot("d1").await.unwrap();
        assert_eq!(found.unwrap().snapshot_id, snapshot.snapshot_id);
        let sequences: Vec<i64> = tail.iter().map(|e| e.sequence_num).collect();
        assert_eq!(sequences, vec![11, 12, 13, 14, 15]);
    }

    #[tokio::test]
    async fn test_events_with_snapshot_without_snapshot_returns_all() {
        let events = Arc::new(MemoryEventStore::new());
        events
            .append(Event::new("d1", Operation::Create, "cA"))
            .await
            .unwrap();
        let manager = SnapshotManager::new(Arc::new(MemorySnapshotStore::new()), events);

        let (snapshot, all) = manager.events_with_snapshot("d1").await.unwrap();
        assert!(snapshot.is_none());
        assert_eq!(all.len(), 1);
    }
}

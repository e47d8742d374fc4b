// File: src/document/memory.rs
//
// In-process versioned document store with a change feed

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};

use docsync_core::{
    Diff, Document, DocumentStore, Operation, SyncError, SyncResult, WatchEvent,
};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// In-process implementation of the versioned document store.
///
/// The single write lock linearizes mutations, standing in for the
/// compare-and-set retry loop a replicated store runs; versions are
/// assigned under it, so they are strictly monotonic per document. Watch
/// events are published in commit order over bounded channels; a full
/// channel blocks the writer rather than dropping the item.
pub struct MemoryDocumentStore<T> {
    documents: RwLock<HashMap<String, T>>,
    watchers: Mutex<Vec<mpsc::Sender<WatchEvent<T>>>>,
    capacity: usize,
}

impl<T: Document> MemoryDocumentStore<T> {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Inject a raw change-feed item, as a feed resuming from a stale token
    /// would. Consumers are expected to deduplicate.
    pub async fn emit(&self, event: WatchEvent<T>) {
        self.publish(event).await;
    }

    async fn publish(&self, event: WatchEvent<T>) {
        let mut watchers = self.watchers.lock().await;
        let mut alive = Vec::with_capacity(watchers.len());
        for tx in watchers.drain(..) {
            if tx.send(event.clone()).await.is_ok() {
                alive.push(tx);
            }
        }
        *watchers = alive;
    }
}

impl<T: Document> Default for MemoryDocumentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Document> DocumentStore<T> for MemoryDocumentStore<T> {
    async fn find_one(&self, id: &str) -> SyncResult<T> {
        let documents = self.documents.read().await;
        documents
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::no_such_document(id))
    }

    async fn find_many(&self) -> SyncResult<Vec<T>> {
        let documents = self.documents.read().await;
        Ok(documents.values().cloned().collect())
    }

    async fn find_one_and_upsert(&self, mut doc: T) -> SyncResult<T> {
        if doc.id().is_empty() {
            return Err(SyncError::invalid_state("document has no id"));
        }

        let mut documents = self.documents.write().await;
        let id = doc.id().to_string();

        let event = match documents.get(&id) {
            Some(existing) => {
                let old_value = serde_json::to_value(existing)?;
                doc.set_version(existing.version() + 1);
                let new_value = serde_json::to_value(&doc)?;
                let diff = Diff::between(&old_value, &new_value, doc.version());
                WatchEvent {
                    document_id: id.clone(),
                    operation: Operation::Update,
                    data: Some(doc.clone()),
                    diff: Some(diff),
                }
            }
            None => {
                doc.set_version(1);
                WatchEvent {
                    document_id: id.clone(),
                    operation: Operation::Create,
                    data: Some(doc.clone()),
                    diff: None,
                }
            }
        };

        documents.insert(id, doc.clone());
        self.publish(event).await;
        Ok(doc)
    }

    async fn find_one_and_update(
        &self,
        id: &str,
        update_fn: &(dyn for<'a> Fn(&'a mut T) -> SyncResult<()> + Send + Sync),
    ) -> SyncResult<(T, Option<Diff>)> {
        let mut documents = self.documents.write().await;
        let current = documents
            .get(id)
            .ok_or_else(|| SyncError::no_such_document(id))?;

        let mut updated = current.clone();
        update_fn(&mut updated)?;
        // The version field is store-owned; pin it before comparing so the
        // closure cannot fabricate or mask a change.
        updated.set_version(current.version());

        let old_value = serde_json::to_value(current)?;
        let probe = Diff::between(&old_value, &serde_json::to_value(&updated)?, current.version());
        if !probe.has_changes {
            return Ok((current.clone(), Some(probe)));
        }

        updated.set_version(current.version() + 1);
        let new_value = serde_json::to_value(&updated)?;
        let diff = Diff::between(&old_value, &new_value, updated.version());

        documents.insert(id.to_string(), updated.clone());
        self.publish(WatchEvent {
            document_id: id.to_string(),
            operation: Operation::Update,
            data: Some(updated.clone()),
            diff: Some(diff.clone()),
        })
        .await;

        Ok((updated, Some(diff)))
    }

    async fn delete_one(&self, id: &str) -> SyncResult<()> {
        let mut documents = self.documents.write().await;
        if documents.remove(id).is_some() {
            self.publish(WatchEvent {
                document_id: id.to_string(),
                operation: Operation::Delete,
                data: None,
                diff: None,
            })
            .await;
        }
        Ok(())
    }

    fn version_field(&self) -> &str {
        T::version_field()
    }

    async fn watch(&self) -> SyncResult<mpsc::Receiver<WatchEvent<T>>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.watchers.lock().await.push(tx);
        Ok(rx)
    }

    async fn close(&self) -> SyncResult<()> {
        // Dropping the senders ends every subscriber's stream.
        self.watchers.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GameState {
        id: String,
        version: i64,
        gold: i64,
    }

    impl Document for GameState {
        fn id(&self) -> &str {
            &self.id
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }
    }

    fn doc(id: &str, gold: i64) -> GameState {
        GameState {
            id: id.to_string(),
            version: 0,
            gold,
        }
    }

    #[tokio::test]
    async fn test_upsert_assigns_version_one_then_increments() {
        let store = MemoryDocumentStore::new();
        let created = store.find_one_and_upsert(doc("d1", 5)).await.unwrap();
        assert_eq!(created.version, 1);

        let replaced = store.find_one_and_upsert(doc("d1", 9)).await.unwrap();
        assert_eq!(replaced.version, 2);
        assert_eq!(store.find_one("d1").await.unwrap().gold, 9);
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_reports_diff() {
        let store = MemoryDocumentStore::new();
        store.find_one_and_upsert(doc("d1", 5)).await.unwrap();

        let (updated, diff) = store
            .find_one_and_update("d1", &|d: &mut GameState| {
                d.gold += 10;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.gold, 15);
        let diff = diff.unwrap();
        assert!(diff.has_changes);
        assert_eq!(diff.version, 2);
        assert_eq!(diff.changes.get("gold"), Some(&serde_json::json!(15)));
    }

    #[tokio::test]
    async fn test_noop_update_consumes_no_version() {
        let store = MemoryDocumentStore::new();
        store.find_one_and_upsert(doc("d1", 5)).await.unwrap();

        let (unchanged, diff) = store
            .find_one_and_update("d1", &|_d: &mut GameState| Ok(()))
            .await
            .unwrap();

        assert_eq!(unchanged.version, 1);
        assert!(!diff.unwrap().has_changes);
    }

    #[tokio::test]
    async fn test_update_missing_document_errors() {
        let store = MemoryDocumentStore::<GameState>::new();
        let err = store
            .find_one_and_update("ghost", &|_d: &mut GameState| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_no_such_document());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryDocumentStore::new();
        store.find_one_and_upsert(doc("d1", 5)).await.unwrap();
        store.delete_one("d1").await.unwrap();
        store.delete_one("d1").await.unwrap();
        assert!(store.find_one("d1").await.is_err());
    }

    #[tokio::test]
    async fn test_watch_delivers_mutations_in_commit_order() {
        let store = MemoryDocumentStore::new();
        let mut feed = store.watch().await.unwrap();

        store.find_one_and_upsert(doc("d1", 5)).await.unwrap();
        store
            .find_one_and_update("d1", &|d: &mut GameState| {
                d.gold = 6;
                Ok(())
            })
            .await
            .unwrap();
        store.delete_one("d1").await.unwrap();

        let first = feed.recv().await.unwrap();
        assert_eq!(first.operation, Operation::Create);
        assert_eq!(first.data.as_ref().unwrap().version, 1);

        let second = feed.recv().await.unwrap();
        assert_eq!(second.operation, Operation::Update);
        assert!(second.diff.is_some());

        let third = feed.recv().await.unwrap();
        assert_eq!(third.operation, Operation::Delete);
        assert!(third.data.is_none());
    }

    #[tokio::test]
    async fn test_version_field_comes_from_the_document_type() {
        let store = MemoryDocumentStore::<GameState>::new();
        assert_eq!(store.version_field(), "version");
    }

    #[tokio::test]
    async fn test_close_ends_watch_streams() {
        let store = MemoryDocumentStore::<GameState>::new();
        let mut feed = store.watch().await.unwrap();
        store.close().await.unwrap();
        assert!(feed.recv().await.is_none());
    }
}

// File: tests/listener_tests.rs
//
// Change-feed listener: ingestion, deduplication across both write paths,
// and lifecycle

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use docsync_core::{
    Document, DocumentStore, Operation, SyncError, WatchEvent, SERVER_CLIENT_ID,
};
use docsync_engine::{
    EventSourcedStore, EventStore, MemoryDocumentStore, MemoryEventStore, MemoryStateVectorStore,
    StateVectorManager, StorageAdapter, StorageListener, SyncConfig, SyncService,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RaidState {
    id: String,
    version: i64,
    value: i64,
}

impl RaidState {
    fn new(id: &str, value: i64) -> Self {
        Self {
            id: id.to_string(),
            version: 0,
            value,
        }
    }
}

impl Document for RaidState {
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

type Listener = StorageListener<RaidState, MemoryDocumentStore<RaidState>>;

struct Harness {
    documents: Arc<MemoryDocumentStore<RaidState>>,
    events: Arc<MemoryEventStore>,
    sync: Arc<SyncService>,
    listener: Listener,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("docsync_engine=debug")
        .try_init();

    let documents = Arc::new(MemoryDocumentStore::new());
    let events = Arc::new(MemoryEventStore::new());
    let events_dyn: Arc<dyn EventStore> = events.clone();

    let state_vectors = Arc::new(StateVectorManager::new(
        Arc::new(MemoryStateVectorStore::new()),
        events_dyn.clone(),
    ));
    let sync = Arc::new(SyncService::new(events_dyn, state_vectors));
    let listener = StorageListener::new(StorageAdapter::new(documents.clone()), sync.clone());

    Harness {
        documents,
        events,
        sync,
        listener,
    }
}

/// Wait until the listener has accounted for `expected` feed items.
async fn settle(listener: &Listener, expected: u64) {
    for _ in 0..200 {
        let stats = listener.stats();
        if stats.events_processed + stats.duplicates_skipped + stats.handler_errors >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("listener never settled at {expected} items: {:?}", listener.stats());
}

// Standalone deployment: no facade, the feed is the only event source.
#[tokio::test]
async fn test_standalone_listener_appends_server_events() {
    let h = harness();
    h.listener.start().await.unwrap();

    h.documents
        .find_one_and_upsert(RaidState::new("d1", 0))
        .await
        .unwrap();
    h.documents
        .find_one_and_update("d1", &|d: &mut RaidState| {
            d.value = 7;
            Ok(())
        })
        .await
        .unwrap();

    settle(&h.listener, 2).await;
    h.listener.stop().await;

    let trail = h.events.events_after_sequence("d1", 0).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].operation, Operation::Create);
    assert_eq!(trail[0].client_id, SERVER_CLIENT_ID);
    assert_eq!(trail[0].server_seq, 1);
    assert_eq!(trail[0].vector_clock.get(SERVER_CLIENT_ID), 1);
    assert_eq!(trail[1].operation, Operation::Update);
    assert_eq!(trail[1].server_seq, 2);
    assert!(trail[1].diff.is_some());
    assert!(trail[1].metadata.contains_key("data"));
}

// Feed redelivery of a triple the listener already handled is skipped.
#[tokio::test]
async fn test_feed_replay_is_deduplicated() {
    let h = harness();
    h.listener.start().await.unwrap();

    let doc = h
        .documents
        .find_one_and_upsert(RaidState::new("d1", 0))
        .await
        .unwrap();
    settle(&h.listener, 1).await;

    // Resume-token replay: the same logical mutation arrives again.
    h.documents
        .emit(WatchEvent {
            document_id: "d1".to_string(),
            operation: Operation::Create,
            data: Some(doc),
            diff: None,
        })
        .await;
    settle(&h.listener, 2).await;
    h.listener.stop().await;

    let trail = h.events.events_after_sequence("d1", 0).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(h.listener.stats().events_processed, 1);
    assert_eq!(h.listener.stats().duplicates_skipped, 1);
}

// Facade and feed both observe the same mutation: at most one event per
// (document, operation, version) triple survives, and the facade's event
// wins because it was appended first.
#[tokio::test]
async fn test_dedup_across_facade_and_feed() {
    let h = harness();
    let facade = EventSourcedStore::new(
        h.documents.clone(),
        h.events.clone() as Arc<dyn EventStore>,
    )
    .with_config(SyncConfig::default().with_auto_snapshot(false));

    // Facade writes land first; the feed has no subscriber yet.
    facade.upsert(RaidState::new("d1", 0), "cA").await.unwrap();
    for _ in 0..6 {
        facade
            .update(
                "d1",
                &|d: &mut RaidState| {
                    d.value += 1;
                    Ok(())
                },
                "cA",
            )
            .await
            .unwrap();
    }
    let current = h.documents.find_one("d1").await.unwrap();
    assert_eq!(current.version, 7);

    // A reconnecting feed now delivers the version-7 update, twice.
    h.listener.start().await.unwrap();
    for _ in 0..2 {
        h.documents
            .emit(WatchEvent {
                document_id: "d1".to_string(),
                operation: Operation::Update,
                data: Some(current.clone()),
                diff: None,
            })
            .await;
    }
    settle(&h.listener, 2).await;
    h.listener.stop().await;

    let at_seven = h
        .events
        .events_after_version("d1", 6)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.server_seq == 7)
        .count();
    assert_eq!(at_seven, 1, "exactly one event at server_seq 7");

    // First delivery collapsed against the persisted facade event, second
    // against the dedup set.
    let stats = h.listener.stats();
    assert_eq!(stats.events_processed, 0);
    assert_eq!(stats.duplicates_skipped, 2);

    // The surviving events all carry the application's client id.
    let trail = h.events.events_after_sequence("d1", 0).await.unwrap();
    assert_eq!(trail.len(), 7);
    assert!(trail.iter().all(|e| e.client_id == "cA"));
}

#[tokio::test]
async fn test_listener_lifecycle() {
    let h = harness();
    assert!(!h.listener.is_running());

    h.listener.start().await.unwrap();
    assert!(h.listener.is_running());

    // Double start is rejected.
    let err = h.listener.start().await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidState { .. }));

    h.listener.stop().await;
    assert!(!h.listener.is_running());

    // A stopped listener can be restarted with a fresh feed.
    h.listener.start().await.unwrap();
    assert!(h.listener.is_running());
    h.listener.stop().await;
}

#[tokio::test]
async fn test_closed_feed_stops_the_loop() {
    let h = harness();
    h.listener.start().await.unwrap();

    h.documents.close().await.unwrap();

    for _ in 0..200 {
        if !h.listener.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("listener kept running after the feed closed");
}

// Deletions carry no post-image; the triple uses version zero and the
// event-store sequence still advances.
#[tokio::test]
async fn test_delete_without_post_image() {
    let h = harness();

    h.documents
        .find_one_and_upsert(RaidState::new("d1", 0))
        .await
        .unwrap();

    h.listener.start().await.unwrap();
    h.documents.delete_one("d1").await.unwrap();
    settle(&h.listener, 1).await;
    h.listener.stop().await;

    let trail = h.events.events_after_sequence("d1", 0).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].operation, Operation::Delete);
    assert_eq!(trail[0].server_seq, 0);
    assert!(!trail[0].metadata.contains_key("data"));
}

#[tokio::test]
async fn test_subscribers_see_listener_ingested_events() {
    let h = harness();
    let mut subscription = h.sync.subscribe();

    h.listener.start().await.unwrap();
    h.documents
        .find_one_and_upsert(RaidState::new("d1", 0))
        .await
        .unwrap();
    settle(&h.listener, 1).await;

    let published = subscription.recv().await.unwrap();
    assert_eq!(published.document_id, "d1");
    assert_eq!(published.client_id, SERVER_CLIENT_ID);

    h.listener.stop().await;
}

// File: src/sync.rs
//
// Sync service: orchestration across event store, state vectors, and the
// change-feed ingestion path

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use docsync_core::{
    Event, StorageEvent, SyncResult, VectorClock, SERVER_CLIENT_ID,
};

use crate::state_vector::StateVectorManager;
use crate::store::EventStore;

const BROADCAST_CAPACITY: usize = 256;

/// Cross-component orchestrator. Every stored event is also published to
/// in-process subscribers; transports pull from there. Delivery is
/// best-effort per subscriber (a lagging receiver misses events), while the
/// store remains the durable source clients catch up from.
pub struct SyncService {
    events: Arc<dyn EventStore>,
    state_vectors: Arc<StateVectorManager>,
    publisher: broadcast::Sender<Event>,
}

impl SyncService {
    pub fn new(events: Arc<dyn EventStore>, state_vectors: Arc<StateVectorManager>) -> Self {
        let (publisher, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            events,
            state_vectors,
            publisher,
        }
    }

    /// Subscribe to events as they are stored.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.publisher.subscribe()
    }

    /// Append an event and publish it to subscribers.
    pub async fn store_event(&self, event: Event) -> SyncResult<Event> {
        let stored = self.events.append(event).await?;
        // No receivers is not an error.
        let _ = self.publisher.send(stored.clone());
        Ok(stored)
    }

    /// Scalar-cursor read: events with `server_seq > after_version`.
    pub async fn events_after_version(
        &self,
        document_id: &str,
        after_version: i64,
    ) -> SyncResult<Vec<Event>> {
        self.events
            .events_after_version(document_id, after_version)
            .await
    }

    /// Vector-clock read for a client; a nil or empty clock uses the
    /// client's persisted cursor.
    pub async fn get_missing_events(
        &self,
        client_id: &str,
        document_id: &str,
        clock: Option<&VectorClock>,
    ) -> SyncResult<Vec<Event>> {
        self.state_vectors
            .missing_events(client_id, document_id, clock)
            .await
    }

    /// Fold a client acknowledgment into its persisted cursor.
    pub async fn update_vector_clock(
        &self,
        client_id: &str,
        document_id: &str,
        partial: &VectorClock,
    ) -> SyncResult<()> {
        self.state_vectors
            .merge(client_id, document_id, partial)
            .await?;
        Ok(())
    }

    /// Turn a normalized change-feed item into a server-authority event and
    /// store it. Change-feed events always carry `client_id = "server"`.
    pub async fn handle_storage_event(&self, envelope: StorageEvent) -> SyncResult<Event> {
        let mut event = Event::new(
            envelope.document_id.clone(),
            envelope.operation,
            SERVER_CLIENT_ID,
        )
        .with_server_seq(envelope.version)
        .with_vector_clock(VectorClock::single(SERVER_CLIENT_ID, 1));

        if let Some(diff) = envelope.diff {
            event = event.with_diff(diff);
        }
        if let Some(data) = envelope.data {
            event = event.with_metadata("data", data);
        }

        debug!(
            document_id = %envelope.document_id,
            operation = %envelope.operation,
            version = envelope.version,
            "storing change-feed event"
        );
        self.store_event(event).await
    }

    pub async fn register_client(&self, client_id: &str) {
        self.state_vectors.register_client(client_id).await;
    }

    pub async fn unregister_client(&self, client_id: &str) -> SyncResult<usize> {
        self.state_vectors.unregister_client(client_id).await
    }
}

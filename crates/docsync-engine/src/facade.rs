// File: src/facade.rs
//
// Event-sourced document facade: mutations against the document store with
// synchronous event emission and optional snapshotting

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use docsync_core::{
    Diff, Document, DocumentStore, Event, Operation, Snapshot, SyncError, SyncResult, VectorClock,
};

use crate::config::{EventErrorPolicy, SyncConfig};
use crate::snapshot::SnapshotManager;
use crate::store::EventStore;

/// Detached snapshot tasks get their own deadline, independent of the
/// caller's cancellation.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Write-through facade over a versioned document store.
///
/// Every successful mutation appends the corresponding event before the
/// call returns, attributed to the caller-supplied client id. The document
/// store's compare-and-set on the version field serializes concurrent
/// writers; the appended events inherit that order through `server_seq`.
///
/// When the append itself fails the mutation is not rolled back: the
/// default `Propagate` policy returns the compound
/// `SyncError::EventAppendFailed` with the mutated document attached, and
/// the `Swallow` policy logs and returns the mutation result.
pub struct EventSourcedStore<T, S> {
    documents: Arc<S>,
    events: Arc<dyn EventStore>,
    snapshots: Option<Arc<SnapshotManager>>,
    config: SyncConfig,
    _document: PhantomData<T>,
}

impl<T, S> EventSourcedStore<T, S>
where
    T: Document,
    S: DocumentStore<T> + 'static,
{
    pub fn new(documents: Arc<S>, events: Arc<dyn EventStore>) -> Self {
        Self {
            documents,
            events,
            snapshots: None,
            config: SyncConfig::default(),
            _document: PhantomData,
        }
    }

    /// Enable the snapshot APIs and the auto-snapshot policy.
    pub fn with_snapshots(mut self, snapshots: Arc<SnapshotManager>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Insert or replace a document, then record the creation.
    pub async fn upsert(&self, data: T, client_id: &str) -> SyncResult<T> {
        let doc = self.documents.find_one_and_upsert(data).await?;
        if doc.id().is_empty() {
            return Err(SyncError::invalid_state("upserted document has no id"));
        }

        let payload = serde_json::to_value(&doc)?;
        let event = Event::new(doc.id(), Operation::Create, client_id)
            .with_server_seq(doc.version())
            .with_vector_clock(VectorClock::single(client_id, 1))
            .with_metadata("created_doc", payload.clone());

        if let Err(cause) = self.events.append(event).await {
            if let Some(error) = self.append_error("created", Some(payload), cause) {
                return Err(error);
            }
        }
        Ok(doc)
    }

    /// Apply an update closure under the store's optimistic concurrency,
    /// then record the change. A closure that changes nothing emits no
    /// event and consumes no version.
    pub async fn update(
        &self,
        id: &str,
        update_fn: &(dyn for<'a> Fn(&'a mut T) -> SyncResult<()> + Send + Sync),
        client_id: &str,
    ) -> SyncResult<(T, Option<Diff>)> {
        let (doc, diff) = self.documents.find_one_and_update(id, update_fn).await?;
        let Some(diff) = diff else {
            return Ok((doc, None));
        };
        if !diff.has_changes {
            return Ok((doc, Some(diff)));
        }

        let event = Event::new(id, Operation::Update, client_id)
            .with_server_seq(diff.version)
            .with_diff(diff.clone())
            .with_vector_clock(VectorClock::single(client_id, 1));

        match self.events.append(event).await {
            Ok(_) => self.maybe_auto_snapshot(id).await,
            Err(cause) => {
                let payload = serde_json::to_value(&doc).ok();
                if let Some(error) = self.append_error("updated", payload, cause) {
                    return Err(error);
                }
            }
        }
        Ok((doc, Some(diff)))
    }

    /// Delete a document, then record the deletion. The event's
    /// `server_seq` is the pre-delete version plus one; a document that was
    /// already gone is deleted idempotently and recorded without a
    /// post-image.
    pub async fn delete(&self, id: &str, client_id: &str) -> SyncResult<()> {
        let (version, deleted_doc) = match self.documents.find_one(id).await {
            Ok(doc) => (doc.version(), Some(serde_json::to_value(&doc)?)),
            Err(error) if error.is_no_such_document() => (0, None),
            Err(error) => return Err(error),
        };

        self.documents.delete_one(id).await?;

        let mut event = Event::new(id, Operation::Delete, client_id)
            .with_server_seq(version + 1)
            .with_vector_clock(VectorClock::single(client_id, 1));
        if let Some(doc) = deleted_doc.clone() {
            event = event.with_metadata("deleted_doc", doc);
        }

        if let Err(cause) = self.events.append(event).await {
            if let Some(error) = self.append_error("deleted", deleted_doc, cause) {
                return Err(error);
            }
        }
        Ok(())
    }

    pub async fn find_one(&self, id: &str) -> SyncResult<T> {
        self.documents.find_one(id).await
    }

    pub async fn find_many(&self) -> SyncResult<Vec<T>> {
        self.documents.find_many().await
    }

    /// Snapshot the document's current state.
    pub async fn create_snapshot(&self, document_id: &str) -> SyncResult<Snapshot> {
        let snapshots = self
            .snapshots
            .as_ref()
            .ok_or(SyncError::SnapshotNotConfigured)?;
        capture_snapshot::<T, S>(&*self.documents, &*self.events, snapshots, document_id).await
    }

    /// Latest snapshot plus the events appended after its capture cursor.
    pub async fn events_with_snapshot(
        &self,
        document_id: &str,
    ) -> SyncResult<(Option<Snapshot>, Vec<Event>)> {
        let snapshots = self
            .snapshots
            .as_ref()
            .ok_or(SyncError::SnapshotNotConfigured)?;
        snapshots.events_with_snapshot(document_id).await
    }

    /// Fire-and-forget snapshot when the document version crosses the
    /// configured interval. The write path never blocks on snapshot I/O.
    async fn maybe_auto_snapshot(&self, document_id: &str) {
        let Some(snapshots) = self.snapshots.clone() else {
            return;
        };
        if !self.config.auto_snapshot || self.config.snapshot_interval <= 0 {
            return;
        }
        let latest = match self.events.latest_version(document_id).await {
            Ok(version) => version,
            Err(error) => {
                warn!(document_id, %error, "auto-snapshot version probe failed");
                return;
            }
        };
        if latest == 0 || latest % self.config.snapshot_interval != 0 {
            return;
        }

        let documents = self.documents.clone();
        let events = self.events.clone();
        let document_id = document_id.to_string();
        tokio::spawn(async move {
            let work = capture_snapshot::<T, S>(&*documents, &*events, &snapshots, &document_id);
            match tokio::time::timeout(SNAPSHOT_TIMEOUT, work).await {
                Ok(Ok(snapshot)) => {
                    debug!(
                        %document_id,
                        version = snapshot.version,
                        "auto-snapshot created"
                    );
                }
                Ok(Err(error)) => warn!(%document_id, %error, "auto-snapshot failed"),
                Err(_) => warn!(%document_id, "auto-snapshot timed out"),
            }
        });
    }

    fn append_error(
        &self,
        operation: &str,
        document: Option<Value>,
        cause: SyncError,
    ) -> Option<SyncError> {
        match self.config.event_error_policy {
            EventErrorPolicy::Propagate => {
                Some(SyncError::append_failed(operation, &cause, document))
            }
            EventErrorPolicy::Swallow => {
                warn!(operation, %cause, "event append failed after mutation");
                None
            }
        }
    }
}

/// Materialize the current document and persist it as a snapshot anchored
/// to the log's current cursors.
async fn capture_snapshot<T, S>(
    documents: &S,
    events: &dyn EventStore,
    snapshots: &SnapshotManager,
    document_id: &str,
) -> SyncResult<Snapshot>
where
    T: Document,
    S: DocumentStore<T> + ?Sized,
{
    let doc = documents.find_one(document_id).await?;
    let state = serde_json::to_value(&doc)?;
    let server_seq = events.latest_version(document_id).await?;
    snapshots
        .create(document_id, state, doc.version(), Some(server_seq))
        .await
}

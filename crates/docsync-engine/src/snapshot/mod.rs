// File: src/snapshot/mod.rs
//
// Snapshot store and lifecycle management

pub mod memory;

pub use memory::MemorySnapshotStore;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use docsync_core::{Event, Snapshot, SyncResult};

use crate::store::EventStore;

/// Persistence interface for snapshots. "Latest" means highest `version`,
/// ties broken by `created_at`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert(&self, snapshot: Snapshot) -> SyncResult<Snapshot>;

    async fn latest(&self, document_id: &str) -> SyncResult<Option<Snapshot>>;

    /// Greatest snapshot with `sequence_num <= max_sequence`.
    async fn by_sequence(
        &self,
        document_id: &str,
        max_sequence: i64,
    ) -> SyncResult<Option<Snapshot>>;

    /// Greatest snapshot with `server_seq <= max_server_seq`.
    async fn by_server_seq(
        &self,
        document_id: &str,
        max_server_seq: i64,
    ) -> SyncResult<Option<Snapshot>>;

    /// Delete snapshots with `sequence_num` strictly below the given value.
    /// Returns the number deleted.
    async fn delete_before(&self, document_id: &str, sequence_num: i64) -> SyncResult<usize>;

    /// Delete snapshots with `server_seq` strictly below the given value.
    async fn delete_before_server_seq(
        &self,
        document_id: &str,
        server_seq: i64,
    ) -> SyncResult<usize>;
}

/// Snapshot lifecycle over a snapshot store and the event log it anchors to.
pub struct SnapshotManager {
    snapshots: Arc<dyn SnapshotStore>,
    events: Arc<dyn EventStore>,
}

impl SnapshotManager {
    pub fn new(snapshots: Arc<dyn SnapshotStore>, events: Arc<dyn EventStore>) -> Self {
        Self { snapshots, events }
    }

    /// Persist a snapshot of the given materialized state. The event-store
    /// cursor is resolved at capture time; when no explicit `server_seq` is
    /// supplied the document version stands in for it.
    pub async fn create(
        &self,
        document_id: &str,
        state: serde_json::Value,
        version: i64,
        server_seq: Option<i64>,
    ) -> SyncResult<Snapshot> {
        let sequence_num = self.events.latest_sequence(document_id).await?;
        let snapshot = Snapshot::new(document_id, state, version)
            .with_sequence_num(sequence_num)
            .with_server_seq(server_seq.unwrap_or(version));
        let stored = self.snapshots.insert(snapshot).await?;
        debug!(
            document_id,
            version = stored.version,
            sequence_num = stored.sequence_num,
            "snapshot created"
        );
        Ok(stored)
    }

    pub async fn latest(&self, document_id: &str) -> SyncResult<Option<Snapshot>> {
        self.snapshots.latest(document_id).await
    }

    pub async fn by_sequence(
        &self,
        document_id: &str,
        max_sequence: i64,
    ) -> SyncResult<Option<Snapshot>> {
        self.snapshots.by_sequence(document_id, max_sequence).await
    }

    pub async fn by_server_seq(
        &self,
        document_id: &str,
        max_server_seq: i64,
    ) -> SyncResult<Option<Snapshot>> {
        self.snapshots
            .by_server_seq(document_id, max_server_seq)
            .await
    }

    /// Compact snapshots below a threshold. The greatest snapshot at or
    /// below `max_sequence` is the anchor and always survives; with no
    /// anchor nothing is deleted.
    pub async fn delete_older_than(
        &self,
        document_id: &str,
        max_sequence: i64,
    ) -> SyncResult<usize> {
        let Some(anchor) = self.snapshots.by_sequence(document_id, max_sequence).await? else {
            return Ok(0);
        };
        self.snapshots
            .delete_before(document_id, anchor.sequence_num)
            .await
    }

    /// Same compaction, thresholded on the document-version cursor.
    pub async fn delete_older_than_server_seq(
        &self,
        document_id: &str,
        max_server_seq: i64,
    ) -> SyncResult<usize> {
        let Some(anchor) = self
            .snapshots
            .by_server_seq(document_id, max_server_seq)
            .await?
        else {
            return Ok(0);
        };
        self.snapshots
            .delete_before_server_seq(document_id, anchor.server_seq)
            .await
    }

    /// Bounded-work rebuild input: the latest snapshot (if any) plus the
    /// events appended after its capture cursor.
    pub async fn events_with_snapshot(
        &self,
        document_id: &str,
    ) -> SyncResult<(Option<Snapshot>, Vec<Event>)> {
        let snapshot = self.snapshots.latest(document_id).await?;
        let after_sequence = snapshot.as_ref().map(|s| s.sequence_num).unwrap_or(0);
        let events = self
            .events
            .events_after_sequence(document_id, after_sequence)
            .await?;
        Ok((snapshot, events))
    }

    /// Materialize the document's current state from the latest snapshot
    /// and the event tail.
    pub async fn rebuild_state(&self, document_id: &str) -> SyncResult<serde_json::Value> {
        let (snapshot, events) = self.events_with_snapshot(document_id).await?;
        Ok(crate::replay::rebuild(snapshot.as_ref(), &events))
    }
}

// File: src/store/mod.rs
//
// Event store: durable, append-only per-document log with two index orders

pub mod memory;

pub use memory::MemoryEventStore;

use async_trait::async_trait;
use docsync_core::{Event, SyncResult, VectorClock};

/// Event store interface for persisting and retrieving events.
///
/// Per document, `sequence_num` values form a contiguous range `1..N` in
/// insertion order and `server_seq` values are nondecreasing. Reads return
/// empty lists, never errors, when nothing has been stored.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a single event and return it as stored.
    ///
    /// When `sequence_num` is zero the store assigns the next per-document
    /// value under its instance sequence lock; a nil `event_id` gets a fresh
    /// one and an unset timestamp gets the current wall clock. A
    /// `(document_id, sequence_num)` or `event_id` collision is
    /// `SyncError::DuplicateKey`; other storage failures surface unchanged.
    async fn append(&self, event: Event) -> SyncResult<Event>;

    /// Append several events in order under one sequence-lock hold.
    async fn append_batch(&self, events: Vec<Event>) -> SyncResult<Vec<Event>>;

    /// Events with `sequence_num > after_sequence`, ascending by sequence.
    async fn events_after_sequence(
        &self,
        document_id: &str,
        after_sequence: i64,
    ) -> SyncResult<Vec<Event>>;

    /// Events with `server_seq > after_version`, ascending by `server_seq`.
    /// This is the single-authority cursor mode: clients track the document
    /// version directly.
    async fn events_after_version(
        &self,
        document_id: &str,
        after_version: i64,
    ) -> SyncResult<Vec<Event>>;

    /// Highest assigned `sequence_num` for the document, or zero.
    async fn latest_sequence(&self, document_id: &str) -> SyncResult<i64>;

    /// Highest recorded `server_seq` for the document, or zero.
    async fn latest_version(&self, document_id: &str) -> SyncResult<i64>;

    /// Multi-authority cursor mode: events from authorities the clock knows
    /// beyond the recorded frontier, plus every event from authorities the
    /// clock does not know. Ascending by `sequence_num`; an empty clock
    /// returns every event.
    async fn events_by_vector_clock(
        &self,
        document_id: &str,
        clock: &VectorClock,
    ) -> SyncResult<Vec<Event>>;
}

// File: src/lib.rs
//
// docsync-core: data model, error taxonomy, and collaborator contracts for
// the docsync event-sourcing + client synchronization engine.
//
// The engine turns optimistic-concurrency-controlled document mutations into
// an append-only, per-document ordered event log and replays missing events
// to reconnecting clients. Two monotonic coordinates index every event:
// `sequence_num` (assigned by the event store) and `server_seq` (the
// document's post-mutation version). Clients track progress with either a
// scalar version cursor or a per-authority vector clock.

pub mod clock;
pub mod diff;
pub mod document;
pub mod error;
pub mod event;
pub mod snapshot;
pub mod state_vector;
pub mod storage;

pub use clock::VectorClock;
pub use diff::Diff;
pub use document::{Document, DocumentStore, WatchEvent};
pub use error::{SyncError, SyncResult};
pub use event::{Event, Operation, SERVER_CLIENT_ID};
pub use snapshot::Snapshot;
pub use state_vector::StateVector;
pub use storage::StorageEvent;

// File: src/snapshot.rs
//
// Materialized document state at a cursor checkpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A materialized document state. A snapshot at `server_seq = K` combined
/// with the events whose `server_seq > K`, applied in ascending order,
/// reconstructs the document's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: Uuid,
    pub document_id: String,
    pub state: Value,
    /// Document version at capture.
    pub version: i64,
    /// Event-store cursor at capture.
    pub sequence_num: i64,
    /// Document-version cursor at capture.
    pub server_seq: i64,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(document_id: impl Into<String>, state: Value, version: i64) -> Self {
        Self {
            snapshot_id: Uuid::new_v4(),
            document_id: document_id.into(),
            state,
            version,
            sequence_num: 0,
            server_seq: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_sequence_num(mut self, sequence_num: i64) -> Self {
        self.sequence_num = sequence_num;
        self
    }

    pub fn with_server_seq(mut self, server_seq: i64) -> Self {
        self.server_seq = server_seq;
        self
    }
}

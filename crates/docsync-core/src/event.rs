// File: src/event.rs
//
// The immutable log record: one state transition on one document, indexed by
// two monotonic per-document cursors

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::VectorClock;
use crate::diff::Diff;

/// Authority identifier attached to change-feed-originated events. Facade
/// writes carry the caller-supplied client id instead; clients never submit
/// events, only cursors.
pub const SERVER_CLIENT_ID: &str = "server";

/// Kind of state transition an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    UpdateSection,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::UpdateSection => "update_section",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" | "insert" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            "update_section" => Ok(Operation::UpdateSection),
            other => Err(crate::error::SyncError::invalid_state(format!(
                "unknown operation: {other}"
            ))),
        }
    }
}

/// A single appended state transition.
///
/// `sequence_num` is assigned by the event store at append time and forms a
/// contiguous per-document range starting at 1. `server_seq` equals the
/// document's post-mutation version and is nondecreasing per document. Both
/// coordinates are valid sync cursors and both are set on every append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub document_id: String,
    pub timestamp: DateTime<Utc>,
    pub sequence_num: i64,
    pub server_seq: i64,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    pub vector_clock: VectorClock,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Event {
    /// New event with a fresh id and the current wall clock. Sequence
    /// coordinates start at zero and are filled in at append time.
    pub fn new(
        document_id: impl Into<String>,
        operation: Operation,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            document_id: document_id.into(),
            timestamp: Utc::now(),
            sequence_num: 0,
            server_seq: 0,
            operation,
            diff: None,
            vector_clock: VectorClock::new(),
            client_id: client_id.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_diff(mut self, diff: Diff) -> Self {
        self.diff = Some(diff);
        self
    }

    pub fn with_sequence_num(mut self, sequence_num: i64) -> Self {
        self.sequence_num = sequence_num;
        self
    }

    pub fn with_server_seq(mut self, server_seq: i64) -> Self {
        self.server_seq = server_seq;
        self
    }

    pub fn with_vector_clock(mut self, vector_clock: VectorClock) -> Self {
        self.vector_clock = vector_clock;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

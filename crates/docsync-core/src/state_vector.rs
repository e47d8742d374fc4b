// File: src/state_vector.rs
//
// Per-(client, document) persisted cursor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::VectorClock;

/// What a client has consumed of one document's log. Exactly one record
/// exists per `(client_id, document_id)`; it is created lazily on first
/// read or update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVector {
    pub state_vector_id: Uuid,
    pub client_id: String,
    pub document_id: String,
    pub vector_clock: VectorClock,
    pub last_updated: DateTime<Utc>,
}

impl StateVector {
    /// Fresh record with an empty clock.
    pub fn new(client_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            state_vector_id: Uuid::new_v4(),
            client_id: client_id.into(),
            document_id: document_id.into(),
            vector_clock: VectorClock::new(),
            last_updated: Utc::now(),
        }
    }

    /// Per-key-maximum merge of a partial clock; touches `last_updated`.
    pub fn merge(&mut self, partial: &VectorClock) {
        self.vector_clock.merge(partial);
        self.last_updated = Utc::now();
    }
}

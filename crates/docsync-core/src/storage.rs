// File: src/storage.rs
//
// Uniform envelope between the change-feed adapter and the listener

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::Diff;
use crate::event::Operation;

/// Normalized change-feed item. `version` is extracted from the post-image
/// document when one exists; deletions carry no post-image and report zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEvent {
    pub document_id: String,
    pub operation: Operation,
    pub data: Option<Value>,
    pub diff: Option<Diff>,
    pub version: i64,
}

impl StorageEvent {
    pub fn new(document_id: impl Into<String>, operation: Operation) -> Self {
        Self {
            document_id: document_id.into(),
            operation,
            data: None,
            diff: None,
            version: 0,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_diff(mut self, diff: Diff) -> Self {
        self.diff = Some(diff);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Dedup key: one logical mutation per `(document, operation, version)`.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.document_id, self.operation, self.version)
    }
}

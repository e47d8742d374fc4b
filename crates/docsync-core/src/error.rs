// File: src/error.rs
//
// Error taxonomy shared by every docsync component

use serde_json::Value;

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Error types for synchronization operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("no such document: {id}")]
    NoSuchDocument { id: String },

    #[error("storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("duplicate key: {message}")]
    DuplicateKey { message: String },

    /// Compound failure: the document mutation committed but the event
    /// append did not. The mutated document rides along so the caller can
    /// still observe the success value of its mutation.
    #[error("document {operation} but event append failed: {message}")]
    EventAppendFailed {
        operation: String,
        message: String,
        document: Option<Value>,
    },

    #[error("snapshot store not configured")]
    SnapshotNotConfigured,

    #[error("invalid state: {message}")]
    InvalidState { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl SyncError {
    pub fn no_such_document(id: impl Into<String>) -> Self {
        SyncError::NoSuchDocument { id: id.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        SyncError::StorageUnavailable {
            message: message.into(),
        }
    }

    pub fn duplicate_key(message: impl Into<String>) -> Self {
        SyncError::DuplicateKey {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        SyncError::InvalidState {
            message: message.into(),
        }
    }

    /// Build the compound mutation-committed/append-failed error for a write
    /// operation ("created", "updated", "deleted").
    pub fn append_failed(
        operation: impl Into<String>,
        cause: &SyncError,
        document: Option<Value>,
    ) -> Self {
        SyncError::EventAppendFailed {
            operation: operation.into(),
            message: cause.to_string(),
            document,
        }
    }

    /// True for the benign "nothing there" read outcome.
    pub fn is_no_such_document(&self) -> bool {
        matches!(self, SyncError::NoSuchDocument { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization {
            message: error.to_string(),
        }
    }
}

#[cfg(feature = "diesel")]
impl From<diesel::result::Error> for SyncError {
    fn from(error: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match error {
            Error::NotFound => SyncError::no_such_document("<unknown>"),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                SyncError::duplicate_key(info.message().to_string())
            }
            other => SyncError::StorageUnavailable {
                message: other.to_string(),
            },
        }
    }
}

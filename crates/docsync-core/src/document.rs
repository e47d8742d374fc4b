// File: src/document.rs
//
// Collaborator contract: the versioned document store with optimistic
// concurrency and a change feed

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::diff::Diff;
use crate::error::SyncResult;
use crate::event::Operation;

/// A uniquely-identified record with a monotonically increasing version.
///
/// The accessors form the descriptor the engine needs to locate the id and
/// version without knowing the document's layout; no runtime reflection is
/// involved.
pub trait Document:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    fn id(&self) -> &str;

    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// Name of the version field in the serialized document.
    fn version_field() -> &'static str {
        "version"
    }
}

/// One item of the change feed, as delivered by the store's watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent<T> {
    pub document_id: String,
    pub operation: Operation,
    /// Post-image document; absent for deletions.
    pub data: Option<T>,
    pub diff: Option<Diff>,
}

/// The versioned document store the engine wraps. Mutations are applied
/// under compare-and-set on the version field; conflicting writers are
/// retried or rejected by the store, never by the engine.
#[async_trait]
pub trait DocumentStore<T: Document>: Send + Sync {
    /// Read one document. A missing document is `SyncError::NoSuchDocument`.
    async fn find_one(&self, id: &str) -> SyncResult<T>;

    async fn find_many(&self) -> SyncResult<Vec<T>>;

    /// Insert or replace, assigning the next version.
    async fn find_one_and_upsert(&self, doc: T) -> SyncResult<T>;

    /// Apply `update_fn` to the current revision under compare-and-set.
    /// Returns the post-mutation document and the structural diff; a diff
    /// with `has_changes == false` means the closure was a no-op and no
    /// version was consumed.
    async fn find_one_and_update(
        &self,
        id: &str,
        update_fn: &(dyn for<'a> Fn(&'a mut T) -> SyncResult<()> + Send + Sync),
    ) -> SyncResult<(T, Option<Diff>)>;

    /// Delete by id. Idempotent: deleting a missing document succeeds.
    async fn delete_one(&self, id: &str) -> SyncResult<()>;

    /// Name of the version field in stored documents.
    fn version_field(&self) -> &str;

    /// Open a change-feed subscription. Items arrive in commit order; the
    /// channel is bounded, so a slow consumer applies backpressure rather
    /// than losing events.
    async fn watch(&self) -> SyncResult<mpsc::Receiver<WatchEvent<T>>>;

    async fn close(&self) -> SyncResult<()>;
}

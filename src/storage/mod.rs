//! Storage backend abstraction: a byte-oriented store for a single record.
//!
//! Dyn-compatible async trait in the shape of `hitbox-backend`'s `Backend`
//! trait (blanket impls over `Arc<dyn StorageBackend>` so the coordinator
//! can hold a heterogeneous map of backends).

pub mod local;
pub mod s3;
pub mod selector;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::content::Content;

pub type BackendResult<T> = anyhow::Result<T>;
pub type ContentStream = Pin<Box<dyn Stream<Item = BackendResult<Content>> + Send>>;
pub type KeyStream = Pin<Box<dyn Stream<Item = BackendResult<String>> + Send>>;

/// A single-record byte store: local disk, or an S3-compatible object store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stable identifier for this backend, stored on each `Content` so the
    /// coordinator can route reads back to the right backend.
    fn backend_id(&self) -> &str;

    /// Loads a full record (metadata + bytes) by key. `Ok(None)` means the
    /// key does not exist in this backend. A corrupt/truncated record is
    /// treated as absent after the backend deletes it (spec.md §4.6).
    async fn load(&self, key: &str) -> BackendResult<Option<Content>>;

    /// Persists a record, overwriting any existing bytes under `content.key`.
    async fn save(&self, content: &Content) -> BackendResult<()>;

    /// Deletes a record. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Streams metadata (bytes absent) for every record in the backend.
    /// Used only during index rebuild from empty state.
    async fn list(&self) -> BackendResult<ContentStream>;

    /// Cheap paginated enumeration of keys only.
    async fn list_keys(&self) -> BackendResult<KeyStream>;
}

#[async_trait]
impl StorageBackend for std::sync::Arc<dyn StorageBackend> {
    fn backend_id(&self) -> &str {
        (**self).backend_id()
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Content>> {
        (**self).load(key).await
    }

    async fn save(&self, content: &Content) -> BackendResult<()> {
        (**self).save(content).await
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        (**self).delete(key).await
    }

    async fn list(&self) -> BackendResult<ContentStream> {
        (**self).list().await
    }

    async fn list_keys(&self) -> BackendResult<KeyStream> {
        (**self).list_keys().await
    }
}

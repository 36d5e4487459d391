//! Snapshot persistence: an opaque key-value store holding compressed blobs.

pub mod blob;
pub mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use blob::{SnapshotBlob, aggregate_key, multi_projection_key};
pub use in_memory::InMemorySnapshotStore;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Encode(String),

    #[error("snapshot decoding failed: {0}")]
    Decode(String),

    #[error("snapshot written by projector {found}, expected {expected}")]
    ProjectorMismatch { expected: String, found: String },

    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value storage for snapshot blobs, keyed by aggregate / projection identity.
///
/// Values are opaque bytes; the layout is owned by [`SnapshotBlob`].
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SnapshotError>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), SnapshotError>;

    async fn delete(&self, key: &str) -> Result<(), SnapshotError>;
}

#[async_trait]
impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SnapshotError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), SnapshotError> {
        (**self).put(key, bytes).await
    }

    async fn delete(&self, key: &str) -> Result<(), SnapshotError> {
        (**self).delete(key).await
    }
}

//! Storage Provider abstraction: an opaque byte store keyed by string paths.
//!
//! This is the leaf dependency of the whole crate (§4.1): every other
//! subsystem reaches storage only through the [`StorageProvider`] trait.
//! Concrete providers (disk, blob) are external per the spec; only the
//! contract plus a self-hosted default and a test double live in core.

pub mod key;
pub mod local_disk;
pub mod memory;

pub use key::{build_key, StoragePool};
pub use local_disk::LocalDiskStorageProvider;
pub use memory::MemoryStorageProvider;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::error::Result;

/// A stream of byte chunks, as returned by `open_read`.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Narrow capability set for persisting and retrieving opaque byte blobs.
///
/// Keys are opaque to the provider but the registry constructs them as
/// `<workspaceId>/<projectId>/<pool>/<random>` (see [`build_key`]). Providers
/// must accept any printable key up to
/// [`crate::constants::storage::MAX_KEY_BYTES`] bytes.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stable identifier recorded on each `File` row so multiple providers
    /// may coexist.
    fn provider_id(&self) -> &str;

    /// Atomically persists bytes under `key`. Overwrite semantics on a
    /// duplicate key are provider-specific but must be all-or-nothing from
    /// the reader's perspective.
    async fn put(&self, key: &str, data: ByteStream, content_type: Option<&str>) -> Result<()>;

    /// Returns `None` iff `key` is absent.
    async fn open_read(&self, key: &str) -> Result<Option<ByteStream>>;

    /// Idempotent: deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn size(&self, key: &str) -> Result<Option<u64>>;
}

#[async_trait]
impl<T: StorageProvider + ?Sized> StorageProvider for std::sync::Arc<T> {
    fn provider_id(&self) -> &str {
        (**self).provider_id()
    }

    async fn put(&self, key: &str, data: ByteStream, content_type: Option<&str>) -> Result<()> {
        (**self).put(key, data, content_type).await
    }

    async fn open_read(&self, key: &str) -> Result<Option<ByteStream>> {
        (**self).open_read(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        (**self).size(key).await
    }
}

/// Collects a [`ByteStream`] fully into memory. Used by processing handlers
/// that need the whole object (e.g. to hand to the IFC converter) and by
/// tests.
pub async fn read_all(mut stream: ByteStream) -> Result<Vec<u8>> {
    use futures::StreamExt;

    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| crate::error::Error::Storage(e.to_string()))?;
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Wraps an in-memory buffer as a single-chunk [`ByteStream`].
pub fn stream_from_bytes(bytes: Vec<u8>) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(Bytes::from(bytes)) }))
}

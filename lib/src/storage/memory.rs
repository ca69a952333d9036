//! Thread-safe in-memory storage provider. Test double only; data is lost
//! when the process terminates.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;

use super::{read_all, stream_from_bytes, ByteStream, StorageProvider};

#[derive(Default)]
pub struct MemoryStorageProvider {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    fn provider_id(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, data: ByteStream, _content_type: Option<&str>) -> Result<()> {
        let bytes = read_all(data).await?;
        self.objects.write().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn open_read(&self, key: &str) -> Result<Option<ByteStream>> {
        let bytes = self.objects.read().get(key).cloned();
        Ok(bytes.map(stream_from_bytes))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.objects.read().get(key).map(|b| b.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::read_all;

    #[tokio::test]
    async fn round_trips_bytes() {
        let provider = MemoryStorageProvider::new();
        provider
            .put("k", stream_from_bytes(b"payload".to_vec()), None)
            .await
            .unwrap();

        let stream = provider.open_read("k").await.unwrap().unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"payload");
        assert_eq!(provider.size("k").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn absent_key_reads_as_none() {
        let provider = MemoryStorageProvider::new();
        assert!(provider.open_read("nope").await.unwrap().is_none());
        assert!(!provider.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let provider = MemoryStorageProvider::new();
        provider.put("k", stream_from_bytes(b"a".to_vec()), None).await.unwrap();
        provider.put("k", stream_from_bytes(b"bb".to_vec()), None).await.unwrap();
        assert_eq!(provider.size("k").await.unwrap(), Some(2));
    }
}

//! Self-hosted default storage provider: bytes live under a root directory
//! on local disk, addressed by the same key the registry constructs.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{Error, Result};

use super::{ByteStream, StorageProvider};

pub struct LocalDiskStorageProvider {
    root: PathBuf,
}

impl LocalDiskStorageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves a key to an absolute path, rejecting any key that would
    /// escape `root` via `..` traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|segment| segment == "..") {
            return Err(Error::Validation(format!("invalid storage key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageProvider for LocalDiskStorageProvider {
    fn provider_id(&self) -> &str {
        "localDisk"
    }

    async fn put(&self, key: &str, mut data: ByteStream, _content_type: Option<&str>) -> Result<()> {
        use futures::StreamExt;

        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
        }

        // Write to a sibling temp file and rename into place so readers never
        // observe a partially written object.
        let tmp_path = path.with_extension("tmp-upload");
        {
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            while let Some(chunk) = data.next().await {
                let chunk = chunk.map_err(|e| Error::Storage(e.to_string()))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Error::Storage(e.to_string()))?;
            }
            file.flush().await.map_err(|e| Error::Storage(e.to_string()))?;
        }
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn open_read(&self, key: &str) -> Result<Option<ByteStream>> {
        let path = self.resolve(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::pin(ReaderStream::new(file)) as ByteStream)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_all, stream_from_bytes};

    async fn provider() -> (LocalDiskStorageProvider, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (LocalDiskStorageProvider::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn round_trips_bytes() {
        let (provider, _dir) = provider().await;
        provider
            .put("ws/proj/files/abc", stream_from_bytes(b"hello".to_vec()), None)
            .await
            .unwrap();

        assert!(provider.exists("ws/proj/files/abc").await.unwrap());
        assert_eq!(provider.size("ws/proj/files/abc").await.unwrap(), Some(5));

        let stream = provider.open_read("ws/proj/files/abc").await.unwrap().unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn open_read_of_absent_key_is_none() {
        let (provider, _dir) = provider().await;
        assert!(provider.open_read("missing/key").await.unwrap().is_none());
        assert_eq!(provider.size("missing/key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (provider, _dir) = provider().await;
        provider
            .put("ws/proj/files/x", stream_from_bytes(b"y".to_vec()), None)
            .await
            .unwrap();
        assert!(provider.delete("ws/proj/files/x").await.unwrap());
        assert!(!provider.delete("ws/proj/files/x").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let (provider, _dir) = provider().await;
        let result = provider
            .put("../escape", stream_from_bytes(b"x".to_vec()), None)
            .await;
        assert!(result.is_err());
    }
}

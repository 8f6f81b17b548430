use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use super::error::StorageError;
use super::traits::{BlobStore, BoxReader, validate_key};

/// In-process blob store. Used by tests and by embedders without a disk.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    /// Total number of `put`/`put_stream` calls that reached the backend.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_stream(&self, key: &str, mut reader: BoxReader) -> Result<u64, StorageError> {
        validate_key(key)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let len = data.len() as u64;

        self.writes.fetch_add(1, Ordering::Relaxed);
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(len)
    }

    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
        let data = self
            .blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        self.blobs
            .read()
            .await
            .get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

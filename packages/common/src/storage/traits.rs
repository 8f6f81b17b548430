use std::io::Cursor;
use std::path::{Component, Path};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Blob storage addressed by relative key.
///
/// Keys are derived from content digests, so writing the same key twice
/// always writes the same bytes: `put` is idempotent and `delete` of an
/// absent key is not an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend identifier recorded alongside each stored object.
    fn name(&self) -> &str;

    /// Store bytes at `key`.
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.put_stream(key, reader).await.map(|_| ())
    }

    /// Store everything readable from `reader` at `key`, returning the byte count.
    async fn put_stream(&self, key: &str, reader: BoxReader) -> Result<u64, StorageError>;

    /// Retrieve all bytes stored at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.get_stream(key).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Retrieve a blob as a streaming async reader.
    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete the blob at `key`.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn size(&self, key: &str) -> Result<u64, StorageError>;

    /// Best-effort public URL for `key`.
    fn url(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Reject keys that are empty, absolute, or climb out of the backend root.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".into()));
    }
    let escapes = Path::new(key).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

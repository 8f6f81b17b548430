use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use super::error::StorageError;
use super::traits::{BlobStore, BoxReader, validate_key};

/// Filesystem-backed blob store.
///
/// Keys map directly to relative paths under `base_path`. Writes land in
/// `{base_path}/.tmp` first and are renamed into place, so a reader never
/// observes a partially written blob.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
    public_url: Option<String>,
}

impl FilesystemBlobStore {
    /// Create a new filesystem blob store.
    pub async fn new(base_path: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            public_url: None,
        })
    }

    /// Serve blobs under `url` (e.g. a static file server in front of `base_path`).
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn put_stream(&self, key: &str, mut reader: BoxReader) -> Result<u64, StorageError> {
        let blob_path = self.blob_path(key)?;
        let temp_path = self.temp_path();
        let mut total_bytes: u64 = 0;

        let written = async {
            let mut temp_file = fs::File::create(&temp_path).await?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                total_bytes += n as u64;
                temp_file.write_all(&buf[..n]).await?;
            }
            temp_file.flush().await?;
            temp_file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        // Same key, same bytes: an existing blob is already correct.
        if fs::try_exists(&blob_path).await? {
            let _ = fs::remove_file(&temp_path).await;
            return Ok(total_bytes);
        }

        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(&temp_path, &blob_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(total_bytes)
    }

    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
        let blob_path = self.blob_path(key)?;
        match fs::File::open(&blob_path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let blob_path = self.blob_path(key)?;
        Ok(fs::try_exists(&blob_path).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let blob_path = self.blob_path(key)?;
        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        let blob_path = self.blob_path(key)?;
        match fs::metadata(&blob_path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn url(&self, key: &str) -> Option<String> {
        self.public_url
            .as_ref()
            .map(|base| format!("{base}/{}", key.trim_start_matches('/')))
    }
}

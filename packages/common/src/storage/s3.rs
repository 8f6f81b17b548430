use async_trait::async_trait;
use futures::TryStreamExt;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use tokio_util::io::StreamReader;

use super::error::StorageError;
use super::traits::{BlobStore, BoxReader, validate_key};

fn backend_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for MinIO, R2 and friends.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub public_url: Option<String>,
}

/// Blob store backed by an S3-compatible object store.
pub struct S3BlobStore {
    bucket: Box<Bucket>,
    public_url: Option<String>,
}

impl S3BlobStore {
    pub fn new(settings: &S3Settings) -> Result<Self, StorageError> {
        let region = match &settings.endpoint {
            Some(endpoint) => Region::Custom {
                region: settings.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => settings.region.parse::<Region>().map_err(backend_err)?,
        };
        let credentials = Credentials::new(
            settings.access_key.as_deref(),
            settings.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(backend_err)?;

        let mut bucket = Bucket::new(&settings.bucket, region, credentials).map_err(backend_err)?;
        if settings.path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            public_url: settings
                .public_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put_stream(&self, key: &str, mut reader: BoxReader) -> Result<u64, StorageError> {
        validate_key(key)?;
        let response = self
            .bucket
            .put_object_stream(&mut reader, key)
            .await
            .map_err(backend_err)?;
        if !is_success(response.status_code()) {
            return Err(StorageError::Backend(format!(
                "put {key} returned status {}",
                response.status_code()
            )));
        }
        Ok(response.uploaded_bytes() as u64)
    }

    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
        validate_key(key)?;
        let response = self
            .bucket
            .get_object_stream(key)
            .await
            .map_err(backend_err)?;
        match response.status_code {
            404 => Err(StorageError::NotFound(key.to_string())),
            status if !is_success(status) => Err(StorageError::Backend(format!(
                "get {key} returned status {status}"
            ))),
            _ => {
                let stream = response
                    .bytes
                    .map_err(|e| std::io::Error::other(e.to_string()));
                Ok(Box::new(StreamReader::new(stream)))
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        let (_, status) = self.bucket.head_object(key).await.map_err(backend_err)?;
        match status {
            404 => Ok(false),
            status if is_success(status) => Ok(true),
            status => Err(StorageError::Backend(format!(
                "head {key} returned status {status}"
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        // S3 reports success for absent keys, so probe first.
        if !self.exists(key).await? {
            return Ok(false);
        }
        let response = self.bucket.delete_object(key).await.map_err(backend_err)?;
        match response.status_code() {
            404 => Ok(false),
            status if is_success(status) => Ok(true),
            status => Err(StorageError::Backend(format!(
                "delete {key} returned status {status}"
            ))),
        }
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        validate_key(key)?;
        let (head, status) = self.bucket.head_object(key).await.map_err(backend_err)?;
        match status {
            404 => Err(StorageError::NotFound(key.to_string())),
            status if is_success(status) => Ok(head.content_length.unwrap_or(0).max(0) as u64),
            status => Err(StorageError::Backend(format!(
                "head {key} returned status {status}"
            ))),
        }
    }

    fn url(&self, key: &str) -> Option<String> {
        let base = self
            .public_url
            .clone()
            .unwrap_or_else(|| self.bucket.url());
        Some(format!("{base}/{}", key.trim_start_matches('/')))
    }
}

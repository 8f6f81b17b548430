use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::StorageError;
use super::filesystem::FilesystemBlobStore;
use super::memory::MemoryBlobStore;
use super::traits::BlobStore;

/// Blob backend selector.
///
/// Deserialized from a table tagged by `backend`, e.g.
/// ```toml
/// [store.storage]
/// backend = "filesystem"
/// root = "/var/lib/dedup"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Filesystem {
        #[serde(default = "default_root")]
        root: PathBuf,
        #[serde(default)]
        public_url: Option<String>,
    },
    Memory,
    S3 {
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key: Option<String>,
        #[serde(default)]
        secret_key: Option<String>,
        #[serde(default)]
        path_style: bool,
        #[serde(default)]
        public_url: Option<String>,
    },
}

fn default_root() -> PathBuf {
    PathBuf::from("./storage")
}
fn default_region() -> String {
    "us-east-1".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            root: default_root(),
            public_url: None,
        }
    }
}

/// Build the blob backend described by `config`.
pub async fn open_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match config {
        StorageConfig::Filesystem { root, public_url } => {
            let mut store = FilesystemBlobStore::new(root.clone()).await?;
            if let Some(url) = public_url {
                store = store.with_public_url(url.clone());
            }
            info!(root = %root.display(), "Opened filesystem blob store");
            Ok(Arc::new(store))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBlobStore::new())),
        #[cfg(feature = "object-storage")]
        StorageConfig::S3 {
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            path_style,
            public_url,
        } => {
            let settings = super::s3::S3Settings {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                path_style: *path_style,
                public_url: public_url.clone(),
            };
            let store = super::s3::S3BlobStore::new(&settings)?;
            info!(bucket = %bucket, "Opened S3 blob store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "object-storage"))]
        StorageConfig::S3 { .. } => Err(StorageError::Backend(
            "S3 backend requires the `object-storage` feature".into(),
        )),
    }
}

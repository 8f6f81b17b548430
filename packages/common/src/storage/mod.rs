mod digest;
mod error;
mod hasher;
mod path;
mod traits;

pub mod config;
pub mod filesystem;
pub mod memory;
#[cfg(feature = "object-storage")]
pub mod s3;

pub use config::{StorageConfig, open_blob_store};
pub use digest::ContentDigest;
pub use error::StorageError;
pub use filesystem::FilesystemBlobStore;
pub use hasher::{AlgorithmDigest, ContentHasher, DigestWriter, HashAlgorithm, Hasher};
pub use memory::MemoryBlobStore;
pub use path::{PathGenerator, ShardedPathGenerator, extension_of, storage_key};
pub use traits::{BlobStore, BoxReader, validate_key};

use thiserror::Error;

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested blob (or local source file) was not found.
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided digest string is not valid lowercase hex.
    #[error("invalid content digest: {0}")]
    InvalidDigest(String),

    /// The storage key would escape the backend root or is empty.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    /// A remote backend rejected the request.
    #[error("storage backend error: {0}")]
    Backend(String),
}

use common::storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the dedup store and the association layer.
///
/// Duplicate-digest races during ingestion never appear here; they are
/// resolved by adopting the winning record.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Source content (a file, usually) is missing at ingestion time.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Undecodable transport encoding, oversized content and similar.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A record points at a blob that does not exist. Never auto-repaired.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// An optimistic update or ingest retry kept losing against concurrent
    /// writers. `target` names the record or digest.
    #[error("{target}: gave up after {attempts} conflicting attempts")]
    ConcurrencyFailure { target: String, attempts: u32 },

    /// The record was reaped between lookup and use.
    #[error("record {0} no longer exists")]
    RecordGone(Uuid),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl From<StorageError> for DedupError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => DedupError::Io(e),
            other => DedupError::Storage(other),
        }
    }
}

pub type Result<T, E = DedupError> = std::result::Result<T, E>;

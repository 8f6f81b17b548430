//! Deduplicated, reference-counted media storage.
//!
//! Content is addressed by digest and stored once. Owners link to records
//! through named collections; each link holds one reference, and the last
//! reference to go takes the record and its blob with it.

pub mod association;
pub mod config;
pub mod database;
pub mod dedup;
pub mod entity;
pub mod error;
pub mod owner;
pub mod record_store;

pub use association::{AttachOutcome, Associations};
pub use config::{DecrementStrategy, DedupConfig};
pub use dedup::DedupStore;
pub use error::{DedupError, Result};
pub use owner::{DEFAULT_COLLECTION, Owner, OwnerRef};
pub use record_store::{
    Association, BlobReaper, DecrementOutcome, MemoryRecordStore, Record, RecordStore,
    SeaOrmRecordStore, StoreStats,
};

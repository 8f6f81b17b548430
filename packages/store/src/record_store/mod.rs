//! Persistence contract for media records and their associations.
//!
//! Every cross-caller guarantee of the dedup store rests on the primitives
//! below: a unique digest, counters that move atomically with association
//! rows, and a decrement that decides on deletion while holding the row.

mod memory;
mod relational;
#[cfg(test)]
pub(crate) mod scripted;

pub use memory::MemoryRecordStore;
pub use relational::SeaOrmRecordStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entity::{media_association, media_record};
use crate::error::Result;
use crate::owner::OwnerRef;

pub type Record = media_record::Model;
pub type Association = media_association::Model;

/// Fields of a record about to be created. Counters and timestamps are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub digest: String,
    pub backend: String,
    pub path: String,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Record),
    /// Another caller committed a record with the same digest first.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Association created and counter incremented.
    Linked,
    /// The association already existed; nothing changed.
    AlreadyLinked,
    /// The record no longer exists.
    RecordGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecrementOutcome {
    Retained { remaining: i64 },
    /// Count reached zero; row and blob are gone.
    Reaped(Record),
    /// Already deleted by someone else.
    Missing,
}

/// Removes the blob of a record that is being deleted.
///
/// Called by the record store after the row delete and before the commit; an
/// error rolls the deletion back.
#[async_trait]
pub trait BlobReaper: Send + Sync {
    async fn reap(&self, record: &Record) -> Result<()>;
}

/// Aggregate counts for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub records: u64,
    pub associations: u64,
    pub total_bytes: u64,
    /// Records with a zero reference count (ingested but never attached).
    pub unreferenced: u64,
}

/// Indexed metadata storage with the atomicity the dedup protocol needs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_digest(&self, digest: &str) -> Result<Option<Record>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Record>>;

    /// Insert a record with `reference_count = 0`. A digest collision with a
    /// committed record yields `Duplicate` instead of an error.
    async fn insert(&self, record: NewRecord) -> Result<InsertOutcome>;

    /// Atomically add one. Returns `false` if the record does not exist.
    async fn increment(&self, id: Uuid) -> Result<bool>;

    /// Atomically subtract one; at zero, delete the row and reap its blob as
    /// one unit.
    async fn decrement(&self, id: Uuid, reaper: &dyn BlobReaper) -> Result<DecrementOutcome>;

    /// Delete the record only if its count is still zero. Returns whether it
    /// was reaped.
    async fn reap_if_unreferenced(&self, id: Uuid, reaper: &dyn BlobReaper) -> Result<bool>;

    /// Zero-count records last touched before `cutoff`.
    async fn unreferenced_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Record>>;

    /// Create the association and increment the record in one unit.
    async fn link(&self, record_id: Uuid, owner: &OwnerRef, collection: &str)
    -> Result<LinkOutcome>;

    /// Remove matching associations, decrementing the record once per
    /// association actually removed. `None` filters match everything.
    async fn unlink(
        &self,
        owner: &OwnerRef,
        record_id: Option<Uuid>,
        collection: Option<&str>,
        reaper: &dyn BlobReaper,
    ) -> Result<Vec<DecrementOutcome>>;

    /// Records linked to `owner` in `collection`, in association insertion order.
    async fn linked_records(&self, owner: &OwnerRef, collection: &str) -> Result<Vec<Record>>;

    async fn count_links(&self, owner: &OwnerRef, collection: &str) -> Result<u64>;

    /// All associations of `owner`, across collections, in insertion order.
    async fn associations_of(&self, owner: &OwnerRef) -> Result<Vec<Association>>;

    async fn stats(&self) -> Result<StoreStats>;
}

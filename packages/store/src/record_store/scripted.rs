//! Record store wrapper that injects concurrent interleavings on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::storage::{BlobStore, MemoryBlobStore, storage_key};
use uuid::Uuid;

use super::{
    Association, BlobReaper, DecrementOutcome, InsertOutcome, LinkOutcome, MemoryRecordStore,
    NewRecord, Record, RecordStore, StoreStats,
};
use crate::error::Result;
use crate::owner::OwnerRef;

pub(crate) const BASE_DIRECTORY: &str = "dedup-media";

#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    /// Before our first insert, a rival ingest of the same content commits
    /// under a name with `extension`.
    RivalCommits { extension: &'static str },
    /// Before our first insert, a reap removes the blob we just wrote.
    BlobReapedBeforeInsert,
    /// Every insert loses to a winner that is gone by the time we look.
    InsertAlwaysDuplicate,
    /// Every link finds the record already reaped.
    LinkAlwaysGone,
}

pub(crate) struct ScriptedRecordStore {
    inner: MemoryRecordStore,
    blobs: Arc<MemoryBlobStore>,
    script: Script,
    fired: AtomicBool,
}

impl ScriptedRecordStore {
    pub(crate) fn new(blobs: Arc<MemoryBlobStore>, script: Script) -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            blobs,
            script,
            fired: AtomicBool::new(false),
        }
    }

    fn first_time(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for ScriptedRecordStore {
    async fn find_by_digest(&self, digest: &str) -> Result<Option<Record>> {
        self.inner.find_by_digest(digest).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Record>> {
        self.inner.find_by_id(id).await
    }

    async fn insert(&self, record: NewRecord) -> Result<InsertOutcome> {
        match self.script {
            Script::RivalCommits { extension } if self.first_time() => {
                let d = &record.digest;
                let rival_path = format!("{}/{}/{d}.{extension}", &d[0..2], &d[2..4]);
                let content = self
                    .blobs
                    .get(&storage_key(BASE_DIRECTORY, &record.path))
                    .await?;
                self.blobs
                    .put(&storage_key(BASE_DIRECTORY, &rival_path), &content)
                    .await?;
                let rival = NewRecord {
                    original_name: format!("rival.{extension}"),
                    path: rival_path,
                    ..record.clone()
                };
                self.inner.insert(rival).await?;
            }
            Script::BlobReapedBeforeInsert if self.first_time() => {
                self.blobs
                    .delete(&storage_key(BASE_DIRECTORY, &record.path))
                    .await?;
            }
            Script::InsertAlwaysDuplicate => return Ok(InsertOutcome::Duplicate),
            _ => {}
        }
        self.inner.insert(record).await
    }

    async fn increment(&self, id: Uuid) -> Result<bool> {
        self.inner.increment(id).await
    }

    async fn decrement(&self, id: Uuid, reaper: &dyn BlobReaper) -> Result<DecrementOutcome> {
        self.inner.decrement(id, reaper).await
    }

    async fn reap_if_unreferenced(&self, id: Uuid, reaper: &dyn BlobReaper) -> Result<bool> {
        self.inner.reap_if_unreferenced(id, reaper).await
    }

    async fn unreferenced_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Record>> {
        self.inner.unreferenced_before(cutoff).await
    }

    async fn link(&self, record_id: Uuid, owner: &OwnerRef, collection: &str) -> Result<LinkOutcome> {
        if matches!(self.script, Script::LinkAlwaysGone) {
            return Ok(LinkOutcome::RecordGone);
        }
        self.inner.link(record_id, owner, collection).await
    }

    async fn unlink(
        &self,
        owner: &OwnerRef,
        record_id: Option<Uuid>,
        collection: Option<&str>,
        reaper: &dyn BlobReaper,
    ) -> Result<Vec<DecrementOutcome>> {
        self.inner
            .unlink(owner, record_id, collection, reaper)
            .await
    }

    async fn linked_records(&self, owner: &OwnerRef, collection: &str) -> Result<Vec<Record>> {
        self.inner.linked_records(owner, collection).await
    }

    async fn count_links(&self, owner: &OwnerRef, collection: &str) -> Result<u64> {
        self.inner.count_links(owner, collection).await
    }

    async fn associations_of(&self, owner: &OwnerRef) -> Result<Vec<Association>> {
        self.inner.associations_of(owner).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }
}

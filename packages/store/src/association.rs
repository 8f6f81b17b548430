use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::dedup::DedupStore;
use crate::error::{DedupError, Result};
use crate::owner::Owner;
use crate::record_store::{LinkOutcome, Record};

/// Ingest-then-attach rounds before a helper gives up on a record that keeps
/// being reaped underneath it.
const ATTACH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    AlreadyAttached,
}

/// Owner-facing view of the dedup store.
///
/// Every association holds exactly one reference on its record. Owners must
/// call [`detach_all`](Self::detach_all) as part of their own deletion;
/// nothing cleans up after an owner implicitly.
#[derive(Clone)]
pub struct Associations {
    store: Arc<DedupStore>,
}

impl Associations {
    pub fn new(store: Arc<DedupStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DedupStore> {
        &self.store
    }

    /// Link `record` to `owner` in `collection`. Idempotent: an existing link
    /// is left alone and the count does not move.
    #[instrument(skip_all, fields(owner = %owner.owner_ref(), record_id = %record.id, collection = %collection))]
    pub async fn attach(
        &self,
        owner: &impl Owner,
        record: &Record,
        collection: &str,
    ) -> Result<AttachOutcome> {
        let owner = owner.owner_ref();
        match self
            .store
            .records()
            .link(record.id, &owner, collection)
            .await?
        {
            LinkOutcome::Linked => {
                debug!("Attached");
                Ok(AttachOutcome::Attached)
            }
            LinkOutcome::AlreadyLinked => Ok(AttachOutcome::AlreadyAttached),
            LinkOutcome::RecordGone => Err(DedupError::RecordGone(record.id)),
        }
    }

    /// Unlink `record` from `owner`, in `collection` or, with `None`, in every
    /// collection. Returns the number of associations removed; each one
    /// released one reference.
    #[instrument(skip_all, fields(owner = %owner.owner_ref(), record_id = %record.id, collection = ?collection))]
    pub async fn detach(
        &self,
        owner: &impl Owner,
        record: &Record,
        collection: Option<&str>,
    ) -> Result<u64> {
        let outcomes = self
            .store
            .records()
            .unlink(
                &owner.owner_ref(),
                Some(record.id),
                collection,
                self.store.as_ref(),
            )
            .await?;
        debug!(removed = outcomes.len(), "Detached");
        Ok(outcomes.len() as u64)
    }

    /// Drop every association of `owner`. Call this when the owner is deleted.
    #[instrument(skip_all, fields(owner = %owner.owner_ref()))]
    pub async fn detach_all(&self, owner: &impl Owner) -> Result<u64> {
        let outcomes = self
            .store
            .records()
            .unlink(&owner.owner_ref(), None, None, self.store.as_ref())
            .await?;
        info!(removed = outcomes.len(), "Detached all media from owner");
        Ok(outcomes.len() as u64)
    }

    /// Records of `owner` in `collection`, oldest association first.
    pub async fn records(&self, owner: &impl Owner, collection: &str) -> Result<Vec<Record>> {
        self.store
            .records()
            .linked_records(&owner.owner_ref(), collection)
            .await
    }

    pub async fn first_record(
        &self,
        owner: &impl Owner,
        collection: &str,
    ) -> Result<Option<Record>> {
        Ok(self.records(owner, collection).await?.into_iter().next())
    }

    pub async fn has_records(&self, owner: &impl Owner, collection: &str) -> Result<bool> {
        Ok(self.count(owner, collection).await? > 0)
    }

    pub async fn count(&self, owner: &impl Owner, collection: &str) -> Result<u64> {
        self.store
            .records()
            .count_links(&owner.owner_ref(), collection)
            .await
    }

    pub async fn attach_bytes(
        &self,
        owner: &impl Owner,
        content: &[u8],
        original_name: &str,
        collection: &str,
        mime_type: Option<&str>,
    ) -> Result<Record> {
        self.ingest_and_attach(owner, collection, move || {
            self.store
                .ingest_from_bytes(content, original_name, mime_type)
        })
        .await
    }

    pub async fn attach_base64(
        &self,
        owner: &impl Owner,
        encoded: &str,
        original_name: &str,
        collection: &str,
        mime_type: Option<&str>,
    ) -> Result<Record> {
        self.ingest_and_attach(owner, collection, move || {
            self.store
                .ingest_from_base64(encoded, original_name, mime_type)
        })
        .await
    }

    pub async fn attach_path(
        &self,
        owner: &impl Owner,
        path: &Path,
        collection: &str,
        original_name: Option<&str>,
    ) -> Result<Record> {
        self.ingest_and_attach(owner, collection, move || {
            self.store.ingest_from_path(path, original_name, None)
        })
        .await
    }

    /// Ingest, then attach. A record reaped in between is re-ingested.
    async fn ingest_and_attach<F, Fut>(
        &self,
        owner: &impl Owner,
        collection: &str,
        ingest: F,
    ) -> Result<Record>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Record>>,
    {
        for attempt in 1..=ATTACH_ATTEMPTS {
            let record = ingest().await?;
            match self.attach(owner, &record, collection).await {
                Ok(_) => {
                    let refreshed = self.store.find_by_id(record.id).await?;
                    return Ok(refreshed.unwrap_or(record));
                }
                Err(DedupError::RecordGone(id)) => {
                    warn!(record_id = %id, attempt, "Record reaped before attach, re-ingesting");
                }
                Err(e) => return Err(e),
            }
        }

        Err(DedupError::ConcurrencyFailure {
            target: format!("attach to {}", owner.owner_ref()),
            attempts: ATTACH_ATTEMPTS,
        })
    }
}

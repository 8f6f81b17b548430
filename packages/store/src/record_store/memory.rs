use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    Association, BlobReaper, DecrementOutcome, InsertOutcome, LinkOutcome, NewRecord, Record,
    RecordStore, StoreStats,
};
use crate::error::Result;
use crate::owner::OwnerRef;

#[derive(Default)]
struct State {
    records: HashMap<Uuid, Record>,
    by_digest: HashMap<String, Uuid>,
    links: BTreeMap<i32, Association>,
    next_link_id: i32,
}

impl State {
    fn matches(association: &Association, owner: &OwnerRef) -> bool {
        association.owner_type == owner.owner_type && association.owner_id == owner.owner_id
    }

    /// Reaper runs before the row goes away so a failure leaves state intact.
    async fn decrement(&mut self, id: Uuid, reaper: &dyn BlobReaper) -> Result<DecrementOutcome> {
        let Some(record) = self.records.get(&id) else {
            return Ok(DecrementOutcome::Missing);
        };

        let remaining = record.reference_count - 1;
        if remaining > 0 {
            if let Some(record) = self.records.get_mut(&id) {
                record.reference_count = remaining;
                record.updated_at = Utc::now();
            }
            return Ok(DecrementOutcome::Retained { remaining });
        }

        reaper.reap(record).await?;
        let record = self.remove(id);
        Ok(record.map_or(DecrementOutcome::Missing, |record| {
            DecrementOutcome::Reaped(Record {
                reference_count: 0,
                ..record
            })
        }))
    }

    fn remove(&mut self, id: Uuid) -> Option<Record> {
        let record = self.records.remove(&id)?;
        self.by_digest.remove(&record.digest);
        self.links.retain(|_, a| a.record_id != id);
        Some(record)
    }
}

/// Record store held in process memory.
///
/// A single async mutex serializes every operation, which trivially gives the
/// atomicity a relational backend gets from transactions. Meant for tests and
/// embedding, not for sharing between processes.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<State>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_digest(&self, digest: &str) -> Result<Option<Record>> {
        let state = self.state.lock().await;
        Ok(state
            .by_digest
            .get(digest)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Record>> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn insert(&self, record: NewRecord) -> Result<InsertOutcome> {
        let mut state = self.state.lock().await;
        if state.by_digest.contains_key(&record.digest) {
            return Ok(InsertOutcome::Duplicate);
        }

        let now = Utc::now();
        let model = Record {
            id: Uuid::now_v7(),
            digest: record.digest,
            backend: record.backend,
            path: record.path,
            original_name: record.original_name,
            mime_type: record.mime_type,
            size: record.size,
            reference_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.by_digest.insert(model.digest.clone(), model.id);
        state.records.insert(model.id, model.clone());
        Ok(InsertOutcome::Inserted(model))
    }

    async fn increment(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(false);
        };
        record.reference_count += 1;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn decrement(&self, id: Uuid, reaper: &dyn BlobReaper) -> Result<DecrementOutcome> {
        self.state.lock().await.decrement(id, reaper).await
    }

    async fn reap_if_unreferenced(&self, id: Uuid, reaper: &dyn BlobReaper) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.records.get(&id) {
            Some(record) if record.reference_count <= 0 => {
                reaper.reap(record).await?;
                state.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unreferenced_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Record>> {
        let state = self.state.lock().await;
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|r| r.reference_count <= 0 && r.updated_at < cutoff)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn link(
        &self,
        record_id: Uuid,
        owner: &OwnerRef,
        collection: &str,
    ) -> Result<LinkOutcome> {
        let mut state = self.state.lock().await;
        if !state.records.contains_key(&record_id) {
            return Ok(LinkOutcome::RecordGone);
        }

        let exists = state.links.values().any(|a| {
            a.record_id == record_id && State::matches(a, owner) && a.collection == collection
        });
        if exists {
            return Ok(LinkOutcome::AlreadyLinked);
        }

        let now = Utc::now();
        state.next_link_id += 1;
        let id = state.next_link_id;
        state.links.insert(
            id,
            Association {
                id,
                record_id,
                owner_type: owner.owner_type.clone(),
                owner_id: owner.owner_id.clone(),
                collection: collection.to_string(),
                created_at: now,
                updated_at: now,
            },
        );
        if let Some(record) = state.records.get_mut(&record_id) {
            record.reference_count += 1;
            record.updated_at = now;
        }
        Ok(LinkOutcome::Linked)
    }

    async fn unlink(
        &self,
        owner: &OwnerRef,
        record_id: Option<Uuid>,
        collection: Option<&str>,
        reaper: &dyn BlobReaper,
    ) -> Result<Vec<DecrementOutcome>> {
        let mut state = self.state.lock().await;
        let matching: Vec<(i32, Uuid)> = state
            .links
            .values()
            .filter(|a| State::matches(a, owner))
            .filter(|a| record_id.is_none_or(|id| a.record_id == id))
            .filter(|a| collection.is_none_or(|c| a.collection == c))
            .map(|a| (a.id, a.record_id))
            .collect();

        let mut outcomes = Vec::with_capacity(matching.len());
        for (link_id, record_id) in matching {
            // Decrement first so a failed reap keeps the association.
            let outcome = state.decrement(record_id, reaper).await?;
            state.links.remove(&link_id);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn linked_records(&self, owner: &OwnerRef, collection: &str) -> Result<Vec<Record>> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .values()
            .filter(|a| State::matches(a, owner) && a.collection == collection)
            .filter_map(|a| state.records.get(&a.record_id).cloned())
            .collect())
    }

    async fn count_links(&self, owner: &OwnerRef, collection: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .values()
            .filter(|a| State::matches(a, owner) && a.collection == collection)
            .count() as u64)
    }

    async fn associations_of(&self, owner: &OwnerRef) -> Result<Vec<Association>> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .values()
            .filter(|a| State::matches(a, owner))
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.state.lock().await;
        Ok(StoreStats {
            records: state.records.len() as u64,
            associations: state.links.len() as u64,
            total_bytes: state.records.values().map(|r| r.size.max(0) as u64).sum(),
            unreferenced: state
                .records
                .values()
                .filter(|r| r.reference_count <= 0)
                .count() as u64,
        })
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, ExprTrait, LockType};
use sea_orm::*;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    Association, BlobReaper, DecrementOutcome, InsertOutcome, LinkOutcome, NewRecord, Record,
    RecordStore, StoreStats,
};
use crate::config::DecrementStrategy;
use crate::entity::{media_association, media_record};
use crate::error::{DedupError, Result};
use crate::owner::OwnerRef;

/// Record store on a relational database through SeaORM.
///
/// Postgres is the production target; SQLite serves tests and single-process
/// deployments (it serializes writers, so `FOR UPDATE` is not emitted there).
#[derive(Clone)]
pub struct SeaOrmRecordStore {
    db: DatabaseConnection,
    strategy: DecrementStrategy,
}

impl SeaOrmRecordStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            strategy: DecrementStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: DecrementStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Decrement inside `txn`. The caller commits; a reaper failure leaves the
    /// transaction uncommitted.
    async fn decrement_in(
        &self,
        txn: &DatabaseTransaction,
        id: Uuid,
        reaper: &dyn BlobReaper,
    ) -> Result<DecrementOutcome> {
        match self.strategy {
            DecrementStrategy::RowLock => decrement_locked(txn, id, reaper).await,
            DecrementStrategy::CompareAndSwap { max_attempts } => {
                decrement_cas(txn, id, reaper, max_attempts).await
            }
        }
    }
}

async fn decrement_locked(
    txn: &DatabaseTransaction,
    id: Uuid,
    reaper: &dyn BlobReaper,
) -> Result<DecrementOutcome> {
    let Some(record) = media_record::Entity::find_by_id(id)
        .lock(LockType::Update)
        .one(txn)
        .await?
    else {
        return Ok(DecrementOutcome::Missing);
    };

    let remaining = record.reference_count - 1;
    if remaining > 0 {
        media_record::Entity::update_many()
            .col_expr(
                media_record::Column::ReferenceCount,
                Expr::col(media_record::Column::ReferenceCount).sub(1),
            )
            .col_expr(media_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(media_record::Column::Id.eq(id))
            .exec(txn)
            .await?;
        return Ok(DecrementOutcome::Retained { remaining });
    }

    media_record::Entity::delete_by_id(id).exec(txn).await?;
    reaper.reap(&record).await?;
    Ok(DecrementOutcome::Reaped(Record {
        reference_count: 0,
        ..record
    }))
}

async fn decrement_cas(
    txn: &DatabaseTransaction,
    id: Uuid,
    reaper: &dyn BlobReaper,
    max_attempts: u32,
) -> Result<DecrementOutcome> {
    let attempts = Ord::max(max_attempts, 1);
    for attempt in 1..=attempts {
        let Some(record) = media_record::Entity::find_by_id(id).one(txn).await? else {
            return Ok(DecrementOutcome::Missing);
        };
        let observed = record.reference_count;

        if observed > 1 {
            let result = media_record::Entity::update_many()
                .col_expr(
                    media_record::Column::ReferenceCount,
                    Expr::value(observed - 1),
                )
                .col_expr(media_record::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(media_record::Column::Id.eq(id))
                .filter(media_record::Column::ReferenceCount.eq(observed))
                .exec(txn)
                .await?;
            if result.rows_affected == 1 {
                return Ok(DecrementOutcome::Retained {
                    remaining: observed - 1,
                });
            }
        } else {
            let result = media_record::Entity::delete_many()
                .filter(media_record::Column::Id.eq(id))
                .filter(media_record::Column::ReferenceCount.eq(observed))
                .exec(txn)
                .await?;
            if result.rows_affected == 1 {
                reaper.reap(&record).await?;
                return Ok(DecrementOutcome::Reaped(Record {
                    reference_count: 0,
                    ..record
                }));
            }
        }

        debug!(record_id = %id, observed, attempt, "Reference count changed underneath, retrying");
    }

    Err(DedupError::ConcurrencyFailure {
        target: format!("record {id}"),
        attempts,
    })
}

fn owner_filter(owner: &OwnerRef) -> Condition {
    Condition::all()
        .add(media_association::Column::OwnerType.eq(owner.owner_type.as_str()))
        .add(media_association::Column::OwnerId.eq(owner.owner_id.as_str()))
}

#[async_trait]
impl RecordStore for SeaOrmRecordStore {
    async fn find_by_digest(&self, digest: &str) -> Result<Option<Record>> {
        Ok(media_record::Entity::find()
            .filter(media_record::Column::Digest.eq(digest))
            .one(&self.db)
            .await?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Record>> {
        Ok(media_record::Entity::find_by_id(id).one(&self.db).await?)
    }

    #[instrument(skip(self, record), fields(digest = %record.digest))]
    async fn insert(&self, record: NewRecord) -> Result<InsertOutcome> {
        let now = Utc::now();
        let model = media_record::ActiveModel {
            id: Set(Uuid::now_v7()),
            digest: Set(record.digest),
            backend: Set(record.backend),
            path: Set(record.path),
            original_name: Set(record.original_name),
            mime_type: Set(record.mime_type),
            size: Set(record.size),
            reference_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match model.insert(&self.db).await {
            Ok(inserted) => Ok(InsertOutcome::Inserted(inserted)),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                debug!("Digest already committed by a concurrent ingest");
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn increment(&self, id: Uuid) -> Result<bool> {
        let result = media_record::Entity::update_many()
            .col_expr(
                media_record::Column::ReferenceCount,
                Expr::col(media_record::Column::ReferenceCount).add(1),
            )
            .col_expr(media_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(media_record::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    #[instrument(skip(self, reaper))]
    async fn decrement(&self, id: Uuid, reaper: &dyn BlobReaper) -> Result<DecrementOutcome> {
        let txn = self.db.begin().await?;
        let outcome = self.decrement_in(&txn, id, reaper).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    #[instrument(skip(self, reaper))]
    async fn reap_if_unreferenced(&self, id: Uuid, reaper: &dyn BlobReaper) -> Result<bool> {
        let txn = self.db.begin().await?;

        let Some(record) = media_record::Entity::find_by_id(id)
            .lock(LockType::Update)
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(false);
        };

        let result = media_record::Entity::delete_many()
            .filter(media_record::Column::Id.eq(id))
            .filter(media_record::Column::ReferenceCount.lte(0))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        reaper.reap(&record).await?;
        txn.commit().await?;
        Ok(true)
    }

    async fn unreferenced_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Record>> {
        Ok(media_record::Entity::find()
            .filter(media_record::Column::ReferenceCount.lte(0))
            .filter(media_record::Column::UpdatedAt.lt(cutoff))
            .order_by_asc(media_record::Column::UpdatedAt)
            .all(&self.db)
            .await?)
    }

    #[instrument(skip(self), fields(owner = %owner))]
    async fn link(
        &self,
        record_id: Uuid,
        owner: &OwnerRef,
        collection: &str,
    ) -> Result<LinkOutcome> {
        let txn = self.db.begin().await?;

        // Bump first: a reaped record must fail here, not on the foreign key.
        let bumped = media_record::Entity::update_many()
            .col_expr(
                media_record::Column::ReferenceCount,
                Expr::col(media_record::Column::ReferenceCount).add(1),
            )
            .col_expr(media_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(media_record::Column::Id.eq(record_id))
            .exec(&txn)
            .await?;
        if bumped.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(LinkOutcome::RecordGone);
        }

        let now = Utc::now();
        let association = media_association::ActiveModel {
            record_id: Set(record_id),
            owner_type: Set(owner.owner_type.clone()),
            owner_id: Set(owner.owner_id.clone()),
            collection: Set(collection.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match association.insert(&txn).await {
            Ok(_) => {
                txn.commit().await?;
                Ok(LinkOutcome::Linked)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await?;
                Ok(LinkOutcome::AlreadyLinked)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, reaper), fields(owner = %owner))]
    async fn unlink(
        &self,
        owner: &OwnerRef,
        record_id: Option<Uuid>,
        collection: Option<&str>,
        reaper: &dyn BlobReaper,
    ) -> Result<Vec<DecrementOutcome>> {
        let mut query = media_association::Entity::find().filter(owner_filter(owner));
        if let Some(record_id) = record_id {
            query = query.filter(media_association::Column::RecordId.eq(record_id));
        }
        if let Some(collection) = collection {
            query = query.filter(media_association::Column::Collection.eq(collection));
        }
        let associations = query
            .order_by_asc(media_association::Column::Id)
            .all(&self.db)
            .await?;

        // One transaction per association: a failure part-way leaves every
        // already-processed pair consistent.
        let mut outcomes = Vec::with_capacity(associations.len());
        for association in associations {
            let txn = self.db.begin().await?;
            // Record row before association row, the same order `link` takes.
            media_record::Entity::find_by_id(association.record_id)
                .lock(LockType::Update)
                .one(&txn)
                .await?;
            let deleted = media_association::Entity::delete_by_id(association.id)
                .exec(&txn)
                .await?;
            if deleted.rows_affected == 0 {
                txn.rollback().await?;
                continue;
            }

            let outcome = self.decrement_in(&txn, association.record_id, reaper).await?;
            if outcome == DecrementOutcome::Missing {
                warn!(
                    record_id = %association.record_id,
                    "Association pointed at a missing record"
                );
            }
            txn.commit().await?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn linked_records(&self, owner: &OwnerRef, collection: &str) -> Result<Vec<Record>> {
        let associations = media_association::Entity::find()
            .filter(owner_filter(owner))
            .filter(media_association::Column::Collection.eq(collection))
            .order_by_asc(media_association::Column::Id)
            .all(&self.db)
            .await?;
        if associations.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = associations.iter().map(|a| a.record_id).collect();
        let records = media_record::Entity::find()
            .filter(media_record::Column::Id.is_in(ids))
            .all(&self.db)
            .await?;

        // Re-impose association order on the unordered record fetch.
        Ok(associations
            .iter()
            .filter_map(|a| records.iter().find(|r| r.id == a.record_id).cloned())
            .collect())
    }

    async fn count_links(&self, owner: &OwnerRef, collection: &str) -> Result<u64> {
        Ok(media_association::Entity::find()
            .filter(owner_filter(owner))
            .filter(media_association::Column::Collection.eq(collection))
            .count(&self.db)
            .await?)
    }

    async fn associations_of(&self, owner: &OwnerRef) -> Result<Vec<Association>> {
        Ok(media_association::Entity::find()
            .filter(owner_filter(owner))
            .order_by_asc(media_association::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let records = media_record::Entity::find().count(&self.db).await?;
        let associations = media_association::Entity::find().count(&self.db).await?;
        let unreferenced = media_record::Entity::find()
            .filter(media_record::Column::ReferenceCount.lte(0))
            .count(&self.db)
            .await?;

        // Summed here: SUM over BIGINT comes back as NUMERIC on Postgres.
        let sizes: Vec<i64> = media_record::Entity::find()
            .select_only()
            .column(media_record::Column::Size)
            .into_tuple()
            .all(&self.db)
            .await?;
        let total_bytes = sizes.into_iter().map(|s| Ord::max(s, 0) as u64).sum();

        Ok(StoreStats {
            records,
            associations,
            total_bytes,
            unreferenced,
        })
    }
}

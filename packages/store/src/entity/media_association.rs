use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Link from an owner entity to a media record, scoped to a collection.
///
/// `(record_id, owner_type, owner_id, collection)` is unique; the index is
/// created by `database::ensure_indexes`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "media_association")]
pub struct Model {
    /// Monotonic id; gives association insertion order.
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub record_id: Uuid,

    #[sea_orm(belongs_to, from = "record_id", to = "id", on_delete = "Cascade")]
    pub record: Option<super::media_record::Entity>,

    /// Owner entity type (e.g. "post", "user").
    pub owner_type: String,

    /// Owner entity ID (canonical string form).
    pub owner_id: String,

    #[sea_orm(default_value = "default")]
    pub collection: String,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One distinct piece of stored content.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "media_record")]
pub struct Model {
    /// UUIDv7 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Hex content digest. The uniqueness constraint is the dedup point.
    #[sea_orm(unique)]
    pub digest: String,

    /// Blob backend identifier ("filesystem", "s3", ...).
    pub backend: String,

    /// Sharded relative path produced by the path generator.
    pub path: String,

    pub original_name: String,

    pub mime_type: Option<String>,

    pub size: i64,

    /// Number of live associations. Zero means "reap on next decrement".
    #[sea_orm(default_value = 0, indexed)]
    pub reference_count: i64,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,

    #[sea_orm(has_many)]
    pub associations: HasMany<super::media_association::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

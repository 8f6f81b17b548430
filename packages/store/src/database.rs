use std::time::Duration;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::info;

use crate::entity::media_association;

/// Connect and bring the schema up to date.
///
/// An in-memory SQLite URL pins the pool to one connection that never
/// expires, since every new connection would open a separate empty database.
pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    if db_url.contains(":memory:") {
        opt.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
    } else {
        opt.max_connections(100)
            .min_connections(5)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(8))
            .max_lifetime(Duration::from_secs(8))
            .sqlx_logging(true);
    }

    let db = Database::connect(opt).await?;
    db.get_schema_registry("dedup_store::entity::*")
        .sync(&db)
        .await?;
    ensure_indexes(&db).await?;

    Ok(db)
}

/// Composite indexes the entity attributes cannot express.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();

    // One link per (record, owner, collection); attach relies on it.
    let unique = Index::create()
        .if_not_exists()
        .unique()
        .name("idx_media_association_link")
        .table(media_association::Entity)
        .col(media_association::Column::RecordId)
        .col(media_association::Column::OwnerType)
        .col(media_association::Column::OwnerId)
        .col(media_association::Column::Collection)
        .to_owned();
    db.execute_raw(backend.build(&unique)).await?;
    info!("Ensured index idx_media_association_link exists");

    // SELECT ... WHERE owner_type = ? AND owner_id = ? AND collection = ?
    let lookup = Index::create()
        .if_not_exists()
        .name("idx_media_association_owner")
        .table(media_association::Entity)
        .col(media_association::Column::OwnerType)
        .col(media_association::Column::OwnerId)
        .col(media_association::Column::Collection)
        .to_owned();
    db.execute_raw(backend.build(&lookup)).await?;
    info!("Ensured index idx_media_association_owner exists");

    Ok(())
}

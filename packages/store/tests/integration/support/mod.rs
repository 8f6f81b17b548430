use std::sync::Arc;

use common::storage::{BlobStore, MemoryBlobStore};
use dedup_store::database::init_db;
use dedup_store::{
    Associations, DecrementStrategy, DedupConfig, DedupStore, MemoryRecordStore, Record,
    RecordStore, SeaOrmRecordStore,
};

/// Digest of `b"Hello, World!"` under the default algorithm.
pub const HELLO_SHA256: &str = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite(DecrementStrategy),
}

/// Every backend the scenarios run against.
pub const BACKENDS: [Backend; 3] = [
    Backend::Memory,
    Backend::Sqlite(DecrementStrategy::RowLock),
    Backend::Sqlite(DecrementStrategy::CompareAndSwap { max_attempts: 5 }),
];

pub struct TestStore {
    pub media: Associations,
    pub blobs: Arc<MemoryBlobStore>,
}

impl TestStore {
    pub async fn new(backend: Backend) -> Self {
        let records: Arc<dyn RecordStore> = match backend {
            Backend::Memory => Arc::new(MemoryRecordStore::new()),
            Backend::Sqlite(strategy) => {
                let db = init_db("sqlite::memory:")
                    .await
                    .expect("Failed to initialize SQLite database");
                Arc::new(SeaOrmRecordStore::new(db).with_strategy(strategy))
            }
        };
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = DedupStore::new(DedupConfig::default(), records, blobs.clone());

        Self {
            media: Associations::new(Arc::new(store)),
            blobs,
        }
    }

    pub fn store(&self) -> &DedupStore {
        self.media.store()
    }

    pub async fn refresh(&self, record: &Record) -> Option<Record> {
        self.store().find_by_id(record.id).await.unwrap()
    }

    pub async fn reference_count(&self, record: &Record) -> i64 {
        self.refresh(record)
            .await
            .map(|r| r.reference_count)
            .unwrap_or(0)
    }

    pub async fn blob_exists(&self, record: &Record) -> bool {
        self.blobs
            .exists(&self.store().storage_key(record))
            .await
            .unwrap()
    }
}

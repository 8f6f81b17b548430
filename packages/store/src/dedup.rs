use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use common::storage::{
    BlobStore, BoxReader, ContentDigest, ContentHasher, Hasher, PathGenerator,
    ShardedPathGenerator, StorageError, extension_of, open_blob_store, storage_key,
};
use sea_orm::DatabaseConnection;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::DedupConfig;
use crate::error::{DedupError, Result};
use crate::record_store::{
    BlobReaper, DecrementOutcome, InsertOutcome, NewRecord, Record, RecordStore,
    SeaOrmRecordStore, StoreStats,
};

/// Rounds of "insert lost, winner already reaped" before ingestion gives up.
const INGEST_ATTEMPTS: u32 = 3;

const SPOOL_CHUNK: usize = 64 * 1024;

/// Where the bytes of a pending blob write come from.
enum Source<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Content-addressed, reference-counted media store.
///
/// Identical content is stored once. Records start unreferenced; the count
/// moves only through [`increment`](Self::increment) and
/// [`decrement`](Self::decrement), normally driven by the association layer.
pub struct DedupStore {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    hasher: Arc<dyn Hasher>,
    paths: Arc<dyn PathGenerator>,
    config: DedupConfig,
}

impl DedupStore {
    pub fn new(
        config: DedupConfig,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            records,
            blobs,
            hasher: Arc::new(ContentHasher::new(config.algorithm)),
            paths: Arc::new(ShardedPathGenerator),
            config,
        }
    }

    /// Build a store on `db` with the blob backend named in `config`.
    pub async fn open(config: DedupConfig, db: DatabaseConnection) -> Result<Self> {
        let blobs = open_blob_store(&config.storage).await?;
        let records = SeaOrmRecordStore::new(db).with_strategy(config.decrement);
        Ok(Self::new(config, Arc::new(records), blobs))
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_path_generator(mut self, paths: Arc<dyn PathGenerator>) -> Self {
        self.paths = paths;
        self
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    pub async fn ingest_from_bytes(
        &self,
        content: &[u8],
        original_name: &str,
        mime_type: Option<&str>,
    ) -> Result<Record> {
        let size = content.len() as u64;
        self.check_size(size)?;
        let digest = self.hasher.hash(content);
        self.store_content(&digest, Source::Bytes(content), size, original_name, mime_type)
            .await
    }

    pub async fn ingest_from_base64(
        &self,
        encoded: &str,
        original_name: &str,
        mime_type: Option<&str>,
    ) -> Result<Record> {
        let content = STANDARD
            .decode(encoded)
            .map_err(|e| DedupError::InvalidInput(format!("invalid base64 content: {e}")))?;
        self.ingest_from_bytes(&content, original_name, mime_type)
            .await
    }

    /// Ingest a stream of unknown length. The content is spooled to a temporary
    /// file while hashing, since the blob path depends on the final digest.
    #[instrument(skip(self, reader))]
    pub async fn ingest_from_stream(
        &self,
        reader: BoxReader,
        original_name: &str,
        mime_type: Option<&str>,
    ) -> Result<Record> {
        let spool = std::env::temp_dir().join(format!("dedup-spool-{}", Uuid::new_v4()));
        let result = self
            .spool_and_store(reader, &spool, original_name, mime_type)
            .await;

        // Best effort.
        let _ = tokio::fs::remove_file(&spool).await;

        result
    }

    /// Ingest a local file. `original_name` defaults to the file name.
    #[instrument(skip(self))]
    pub async fn ingest_from_path(
        &self,
        path: &Path,
        original_name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Result<Record> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| source_error(path, e))?;
        if !metadata.is_file() {
            return Err(DedupError::InvalidInput(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        self.check_size(metadata.len())?;

        let digest = self.hash_source(path).await?;
        let name = match original_name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        self.store_content(&digest, Source::File(path), metadata.len(), &name, mime_type)
            .await
    }

    pub async fn find_by_hash(&self, digest: &str) -> Result<Option<Record>> {
        self.records
            .find_by_digest(&digest.to_ascii_lowercase())
            .await
    }

    pub async fn exists_by_hash(&self, digest: &str) -> Result<bool> {
        Ok(self.find_by_hash(digest).await?.is_some())
    }

    /// Whether the content of a local file is already stored. A missing file
    /// is simply not stored.
    pub async fn exists_by_path(&self, path: &Path) -> Result<bool> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(false);
        }
        let digest = self.hash_source(path).await?;
        self.exists_by_hash(digest.as_str()).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Record>> {
        self.records.find_by_id(id).await
    }

    /// Add one reference. Returns the refreshed record.
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    pub async fn increment(&self, record: &Record) -> Result<Record> {
        if !self.records.increment(record.id).await? {
            return Err(DedupError::RecordGone(record.id));
        }
        let refreshed = self
            .records
            .find_by_id(record.id)
            .await?
            .ok_or(DedupError::RecordGone(record.id))?;
        debug!(reference_count = refreshed.reference_count, "Incremented");
        Ok(refreshed)
    }

    /// Drop one reference; at zero the record and its blob are removed
    /// together. Decrementing a record that is already gone is a no-op.
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    pub async fn decrement(&self, record: &Record) -> Result<DecrementOutcome> {
        let outcome = self.records.decrement(record.id, self).await?;
        if let DecrementOutcome::Retained { remaining } = &outcome {
            debug!(remaining, "Decremented");
        }
        Ok(outcome)
    }

    pub async fn read(&self, record: &Record) -> Result<Vec<u8>> {
        let key = self.storage_key(record);
        self.blobs
            .get(&key)
            .await
            .map_err(|e| self.missing_blob(record, &key, e))
    }

    pub async fn read_stream(&self, record: &Record) -> Result<BoxReader> {
        let key = self.storage_key(record);
        self.blobs
            .get_stream(&key)
            .await
            .map_err(|e| self.missing_blob(record, &key, e))
    }

    /// Key of the record's blob in the blob backend.
    pub fn storage_key(&self, record: &Record) -> String {
        storage_key(&self.config.base_directory, &record.path)
    }

    pub fn url(&self, record: &Record) -> Option<String> {
        self.blobs.url(&self.storage_key(record))
    }

    pub fn path_for(&self, digest: &ContentDigest, extension: &str) -> String {
        self.paths.generate(digest, extension)
    }

    /// Reap records that were ingested but not referenced for `older_than`.
    /// A record attached in the meantime is left alone.
    #[instrument(skip(self))]
    pub async fn prune_unreferenced(&self, older_than: Duration) -> Result<u64> {
        let grace = chrono::Duration::from_std(older_than)
            .map_err(|e| DedupError::InvalidInput(format!("grace period out of range: {e}")))?;
        let cutoff = Utc::now() - grace;

        let candidates = self.records.unreferenced_before(cutoff).await?;
        let mut reaped = 0;
        for record in &candidates {
            if self.records.reap_if_unreferenced(record.id, self).await? {
                reaped += 1;
            }
        }

        info!(
            candidates = candidates.len(),
            reaped, "Pruned unreferenced records"
        );
        Ok(reaped)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.records.stats().await
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.config.max_blob_size {
            return Err(DedupError::InvalidInput(format!(
                "content of {size} bytes exceeds the limit of {} bytes",
                self.config.max_blob_size
            )));
        }
        Ok(())
    }

    async fn hash_source(&self, path: &Path) -> Result<ContentDigest> {
        self.hasher.hash_file(path).await.map_err(|e| match e {
            StorageError::NotFound(_) => DedupError::NotFound(path.display().to_string()),
            other => other.into(),
        })
    }

    async fn spool_and_store(
        &self,
        mut reader: BoxReader,
        spool: &Path,
        original_name: &str,
        mime_type: Option<&str>,
    ) -> Result<Record> {
        let mut file = tokio::fs::File::create(spool).await?;
        let mut digest = self.hasher.begin();
        let mut buf = vec![0u8; SPOOL_CHUNK];
        let mut total: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            self.check_size(total)?;
            digest.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        drop(file);

        let digest = digest.finish();
        self.store_content(&digest, Source::File(spool), total, original_name, mime_type)
            .await
    }

    /// Look up or create the record for `digest`.
    ///
    /// The blob is written before the row is inserted, so a committed record
    /// never points at a missing blob. The digest's unique constraint picks
    /// the winner among concurrent ingests; losers adopt the winning row.
    async fn store_content(
        &self,
        digest: &ContentDigest,
        source: Source<'_>,
        size: u64,
        original_name: &str,
        mime_type: Option<&str>,
    ) -> Result<Record> {
        // Key of a blob we wrote that no record points at yet.
        let mut written: Option<String> = None;

        for attempt in 1..=INGEST_ATTEMPTS {
            if let Some(existing) = self.records.find_by_digest(digest.as_str()).await? {
                debug!(digest = %digest, record_id = %existing.id, "Dedup hit");
                self.discard_unless_adopted(written.as_deref(), &existing)
                    .await?;
                return Ok(existing);
            }

            let path = self.paths.generate(digest, extension_of(original_name));
            let key = storage_key(&self.config.base_directory, &path);
            self.write_blob(&key, &source).await?;
            written = Some(key.clone());

            let new = NewRecord {
                digest: digest.to_string(),
                backend: self.blobs.name().to_string(),
                path,
                original_name: original_name.to_string(),
                mime_type: mime_type
                    .map(str::to_string)
                    .or_else(|| guess_mime(original_name)),
                size: i64::try_from(size).unwrap_or(i64::MAX),
            };

            match self.records.insert(new).await? {
                InsertOutcome::Inserted(record) => {
                    // A reap of an earlier record with this digest and
                    // extension may have removed the blob after our write.
                    if !self.blobs.exists(&key).await? {
                        warn!(digest = %digest, key, "Blob reaped during ingest, rewriting");
                        self.write_blob(&key, &source).await?;
                    }
                    info!(digest = %digest, record_id = %record.id, size, "Record created");
                    return Ok(record);
                }
                InsertOutcome::Duplicate => {
                    if let Some(winner) = self.records.find_by_digest(digest.as_str()).await? {
                        warn!(
                            digest = %digest,
                            record_id = %winner.id,
                            "Lost ingest race, adopting winning record"
                        );
                        self.discard_unless_adopted(written.as_deref(), &winner)
                            .await?;
                        return Ok(winner);
                    }
                    // Winner was reaped before we could read it, possibly
                    // taking the blob we just wrote with it.
                    warn!(digest = %digest, attempt, "Winning record vanished, retrying ingest");
                }
            }
        }

        Err(DedupError::ConcurrencyFailure {
            target: format!("digest {digest}"),
            attempts: INGEST_ATTEMPTS,
        })
    }

    /// Delete the blob at `written` when the adopted record lives elsewhere.
    /// The digest is unique, so no other record can point at that key.
    async fn discard_unless_adopted(&self, written: Option<&str>, adopted: &Record) -> Result<()> {
        let Some(written) = written else {
            return Ok(());
        };
        if written != self.storage_key(adopted) {
            debug!(key = written, record_id = %adopted.id, "Discarding blob of lost ingest");
            self.blobs.delete(written).await?;
        }
        Ok(())
    }

    async fn write_blob(&self, key: &str, source: &Source<'_>) -> Result<()> {
        match source {
            Source::Bytes(content) => self.blobs.put(key, content).await?,
            Source::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| source_error(path, e))?;
                self.blobs.put_stream(key, Box::new(file)).await?;
            }
        }
        Ok(())
    }

    fn missing_blob(&self, record: &Record, key: &str, err: StorageError) -> DedupError {
        match err {
            StorageError::NotFound(_) => {
                error!(record_id = %record.id, key, "Record references a missing blob");
                DedupError::InconsistentState(format!(
                    "record {} references missing blob {key}",
                    record.id
                ))
            }
            other => other.into(),
        }
    }
}

#[async_trait]
impl BlobReaper for DedupStore {
    async fn reap(&self, record: &Record) -> Result<()> {
        let key = self.storage_key(record);
        if !self.blobs.delete(&key).await? {
            warn!(record_id = %record.id, key, "Blob already absent while reaping");
        }
        info!(record_id = %record.id, digest = %record.digest, "Record reaped");
        Ok(())
    }
}

fn source_error(path: &Path, err: std::io::Error) -> DedupError {
    if err.kind() == std::io::ErrorKind::NotFound {
        DedupError::NotFound(path.display().to_string())
    } else {
        DedupError::Io(err)
    }
}

fn guess_mime(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
}

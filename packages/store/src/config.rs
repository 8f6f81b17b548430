use common::storage::{HashAlgorithm, StorageConfig};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// How a decrement serializes against concurrent writers to the same row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DecrementStrategy {
    /// `SELECT ... FOR UPDATE`, then update or delete, in one transaction.
    #[default]
    RowLock,
    /// Conditional `UPDATE ... WHERE reference_count = observed`, retried.
    CompareAndSwap { max_attempts: u32 },
}

/// Dedup store configuration. Owned by the caller and passed in at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Digest function. Default: sha256.
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    /// Prefix prepended to every generated path. Default: "dedup-media".
    #[serde(default = "default_base_directory")]
    pub base_directory: String,
    /// Blob backend. Default: filesystem at ./storage.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Largest accepted blob in bytes. Default: 512 MiB.
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
    #[serde(default)]
    pub decrement: DecrementStrategy,
}

fn default_base_directory() -> String {
    "dedup-media".into()
}
fn default_max_blob_size() -> u64 {
    512 * 1024 * 1024
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            base_directory: default_base_directory(),
            storage: StorageConfig::default(),
            max_blob_size: default_max_blob_size(),
            decrement: DecrementStrategy::default(),
        }
    }
}

impl DedupConfig {
    /// Load from `config/dedup.toml` (optional, overridable with `DEDUP_CONFIG`)
    /// and `DEDUP__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("DEDUP_CONFIG").unwrap_or_else(|_| "config/dedup".to_string());
        Self::load_from(&config_path, Environment::with_prefix("DEDUP").separator("__"))
    }

    fn load_from(config_path: &str, env: Environment) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            // e.g. DEDUP__ALGORITHM=blake3, DEDUP__STORAGE__BACKEND=memory
            .add_source(env)
            .build()?;

        s.try_deserialize()
    }
}

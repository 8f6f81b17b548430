use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tokio::fs;
use tokio::io::AsyncReadExt;

use super::digest::ContentDigest;
use super::error::StorageError;
use super::traits::BoxReader;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Digest function used to identify content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    /// Length of a digest produced by this algorithm, in hex characters.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            other => Err(StorageError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Incremental digest state.
pub trait DigestWriter: Send {
    fn update(&mut self, data: &[u8]);

    fn finish(self: Box<Self>) -> ContentDigest;
}

/// Digest state for one of the built-in algorithms.
pub enum AlgorithmDigest {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl AlgorithmDigest {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl DigestWriter for AlgorithmDigest {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finish(self: Box<Self>) -> ContentDigest {
        match *self {
            Self::Sha256(h) => ContentDigest::from_bytes(&h.finalize()),
            Self::Sha512(h) => ContentDigest::from_bytes(&h.finalize()),
            Self::Blake3(h) => ContentDigest::from_bytes(h.finalize().as_bytes()),
        }
    }
}

/// Computes deterministic content digests.
///
/// Identical bytes always produce an identical digest regardless of whether
/// they arrive as a slice, a stream, or a file.
#[async_trait]
pub trait Hasher: Send + Sync {
    fn algorithm(&self) -> HashAlgorithm;

    /// Start an incremental digest.
    fn begin(&self) -> Box<dyn DigestWriter>;

    fn hash(&self, data: &[u8]) -> ContentDigest {
        let mut writer = self.begin();
        writer.update(data);
        writer.finish()
    }

    /// Digest everything readable from `reader`.
    async fn hash_stream(&self, mut reader: BoxReader) -> Result<ContentDigest, StorageError> {
        let mut writer = self.begin();
        let mut buf = vec![0u8; READ_BUF_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.update(&buf[..n]);
        }

        Ok(writer.finish())
    }

    /// Digest a local file. Fails with `NotFound` if it does not exist.
    async fn hash_file(&self, path: &Path) -> Result<ContentDigest, StorageError> {
        let file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        self.hash_stream(Box::new(file)).await
    }
}

/// Hasher backed by one of the built-in algorithms.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }
}

impl Hasher for ContentHasher {
    fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn begin(&self) -> Box<dyn DigestWriter> {
        Box::new(AlgorithmDigest::new(self.algorithm))
    }
}

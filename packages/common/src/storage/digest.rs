use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// Shortest digest the two-level shard layout can address.
const MIN_HEX_LEN: usize = 4;

/// A validated, lowercase hex content digest.
///
/// The length depends on the algorithm that produced it (64 chars for
/// SHA-256 and BLAKE3, 128 for SHA-512).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Encode raw digest output as hex.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Parse a hex-encoded digest string. Uppercase input is normalized.
    pub fn from_hex(s: &str) -> Result<Self, StorageError> {
        if s.len() < MIN_HEX_LEN {
            return Err(StorageError::InvalidDigest(format!(
                "expected at least {MIN_HEX_LEN} hex characters, got {}",
                s.len()
            )));
        }
        if s.len() % 2 != 0 {
            return Err(StorageError::InvalidDigest(format!(
                "odd number of hex characters ({})",
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest("invalid hex character".into()));
        }

        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// First-level shard directory (hex chars 0..2).
    pub fn shard_level1(&self) -> &str {
        &self.0[0..2]
    }

    /// Second-level shard directory (hex chars 2..4).
    pub fn shard_level2(&self) -> &str {
        &self.0[2..4]
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentDigest {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<str> for ContentDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

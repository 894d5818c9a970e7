//! Fixed-size hash identities used as cache keys and integrity checksums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of bytes in a [`CacheId`].
pub const CACHE_ID_LEN: usize = 20;

/// Error returned when parsing a hash identity from its hex form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    /// The input had the wrong number of hex digits.
    #[error("expected {expected} hex digits, got {actual}")]
    Length {
        /// Required number of hex digits.
        expected: usize,
        /// Number of characters supplied.
        actual: usize,
    },

    /// The input contained a non-hex character.
    #[error("invalid hex digit in '{0}'")]
    InvalidDigit(String),
}

fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N], ParseIdError> {
    if s.len() != N * 2 {
        return Err(ParseIdError::Length {
            expected: N * 2,
            actual: s.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(|_| ParseIdError::InvalidDigit(s.to_string()))?;
    Ok(out)
}

/// A 160-bit key naming one pipeline binary in the cache.
///
/// Two binaries with the same `CacheId` are treated as the same binary; there
/// is no secondary verification on collision.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheId([u8; CACHE_ID_LEN]);

impl CacheId {
    /// Wraps raw digest bytes.
    pub const fn new(bytes: [u8; CACHE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives the natural key of a binary from its own bytes.
    pub fn from_data(data: &[u8]) -> Self {
        crate::KeyDeriver::new().bytes(data).finish()
    }

    /// Builds a key from a slice that must be exactly [`CACHE_ID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseIdError> {
        let arr: [u8; CACHE_ID_LEN] = bytes.try_into().map_err(|_| ParseIdError::Length {
            expected: CACHE_ID_LEN * 2,
            actual: bytes.len() * 2,
        })?;
        Ok(Self(arr))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; CACHE_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheId({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl FromStr for CacheId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex::<CACHE_ID_LEN>(s).map(Self)
    }
}

/// The driver's internal 128-bit identity for a compiled pipeline.
///
/// This is what debug tooling knows a pipeline by. Reinjection maps it to
/// the [`CacheId`] whose binary should be used in its place.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineHash {
    /// Hash of the pipeline state that is stable across runs.
    pub stable: u64,
    /// Hash that also covers per-run unique state.
    pub unique: u64,
}

impl PipelineHash {
    /// Creates a pipeline hash from its two halves.
    pub const fn new(stable: u64, unique: u64) -> Self {
        Self { stable, unique }
    }
}

impl fmt::Display for PipelineHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.stable, self.unique)
    }
}

impl fmt::Debug for PipelineHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipelineHash({self})")
    }
}

impl FromStr for PipelineHash {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex::<16>(s)?;
        let (hi, lo) = bytes.split_at(8);
        let mut stable = [0u8; 8];
        let mut unique = [0u8; 8];
        stable.copy_from_slice(hi);
        unique.copy_from_slice(lo);
        Ok(Self {
            stable: u64::from_be_bytes(stable),
            unique: u64::from_be_bytes(unique),
        })
    }
}

/// A 128-bit XXH3 checksum used for integrity checks on stored payloads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

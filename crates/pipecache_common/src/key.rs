//! Key derivation for pipeline binaries and platform identities.

use sha2::{Digest, Sha256};

use crate::hash::{CacheId, CACHE_ID_LEN};

/// Incremental builder for a [`CacheId`].
///
/// Feeds pipeline-defining inputs into SHA-256 and truncates the digest to
/// 160 bits. Variable-length inputs are length-prefixed so that adjacent
/// fields cannot run into each other.
#[derive(Clone, Default)]
pub struct KeyDeriver {
    hasher: Sha256,
}

impl KeyDeriver {
    /// Starts an empty derivation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mixes in a length-prefixed byte slice.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.hasher.update((data.len() as u64).to_le_bytes());
        self.hasher.update(data);
        self
    }

    /// Mixes in a string.
    pub fn str(self, s: &str) -> Self {
        self.bytes(s.as_bytes())
    }

    /// Mixes in a little-endian `u32`.
    pub fn u32(mut self, v: u32) -> Self {
        self.hasher.update(v.to_le_bytes());
        self
    }

    /// Finishes the derivation.
    pub fn finish(self) -> CacheId {
        let digest = self.hasher.finalize();
        let mut out = [0u8; CACHE_ID_LEN];
        out.copy_from_slice(&digest[..CACHE_ID_LEN]);
        CacheId::new(out)
    }
}

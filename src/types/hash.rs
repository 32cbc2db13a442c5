//! SHA3-256 digests.

use crate::types::encoding::EncodeSink;
use sha3::{Digest, Sha3_256};
use std::fmt;

pub const HASH_LEN: usize = 32;

/// 32-byte SHA3-256 digest.
///
/// Keys the dedup index and derives contract addresses; every node computes
/// the same digest for the same encoded input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Starts a digest whose input is prefixed with `domain`, so digests of
    /// different kinds of data never collide.
    pub fn tagged(domain: &[u8]) -> HashBuilder {
        let mut builder = HashBuilder {
            hasher: Sha3_256::new(),
        };
        builder.update(domain);
        builder
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

/// Incremental digest; an [`EncodeSink`] so values hash without a buffer.
pub struct HashBuilder {
    hasher: Sha3_256,
}

impl HashBuilder {
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }
}

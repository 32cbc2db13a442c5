//! Contract and cell addressing.
//!
//! A cell is named by the triple (contract, slot, optional key). The slot
//! selects a root; the key selects an entry of the map or array rooted there.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::{HASH_LEN, Hash};
use std::fmt;

/// 32-byte address identifying a contract namespace.
///
/// This type is `Copy`: it is passed on every storage call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
pub struct ContractAddress(pub [u8; HASH_LEN]);

impl ContractAddress {
    /// Derives an address from an arbitrary seed (deployment id, name, ...).
    pub fn derive(seed: &[u8]) -> Self {
        let mut h = Hash::tagged(b"CONTRACT");
        h.update(seed);
        Self(h.finalize().0)
    }

    /// Builds an address from a byte slice, returning `None` on length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

impl Encode for ContractAddress {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
    }
}

impl Decode for ContractAddress {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self(<[u8; HASH_LEN]>::decode(input)?))
    }
}

/// Contract-relative cell reference: a root slot and an optional entry key.
///
/// Ordering is `(slot, key)` with the root (`key == None`) first, which is
/// the canonical order used when a mutation set is listed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct CellRef {
    pub slot: u64,
    pub key: Option<u64>,
}

impl CellRef {
    /// Reference to the root cell of `slot`.
    pub const fn root(slot: u64) -> Self {
        Self { slot, key: None }
    }

    /// Reference to entry `key` under `slot`.
    pub const fn keyed(slot: u64, key: u64) -> Self {
        Self {
            slot,
            key: Some(key),
        }
    }

    pub const fn is_root(&self) -> bool {
        self.key.is_none()
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            None => write!(f, "#{}", self.slot),
            Some(key) => write!(f, "#{}[{}]", self.slot, key),
        }
    }
}

impl Encode for CellRef {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.slot.encode(out);
        self.key.encode(out);
    }
}

impl Decode for CellRef {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            slot: u64::decode(input)?,
            key: Option::<u64>::decode(input)?,
        })
    }
}

/// Fully qualified cell address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct CellAddress {
    pub contract: ContractAddress,
    pub cell: CellRef,
}

impl CellAddress {
    pub const fn new(contract: ContractAddress, cell: CellRef) -> Self {
        Self { contract, cell }
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.contract, self.cell)
    }
}

//! Metering and guard layer.
//!
//! Counts operations and serialized bytes forwarded to the backend and, when
//! configured read-only, rejects every mutating call before it reaches the
//! backend. Rejected calls are not counted.

use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::address::{CellRef, ContractAddress};
use crate::types::encoding::Encode;
use crate::types::value::Value;
use crate::warn;

/// Operation and byte counters used for fee computation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl StorageUsage {
    /// Adds `other` into `self`, saturating.
    pub fn merge(&mut self, other: &StorageUsage) {
        self.reads = self.reads.saturating_add(other.reads);
        self.writes = self.writes.saturating_add(other.writes);
        self.bytes_read = self.bytes_read.saturating_add(other.bytes_read);
        self.bytes_written = self.bytes_written.saturating_add(other.bytes_written);
    }

    fn read(&mut self, bytes: usize) {
        self.reads = self.reads.saturating_add(1);
        self.bytes_read = self.bytes_read.saturating_add(bytes as u64);
    }

    fn write(&mut self, bytes: usize) {
        self.writes = self.writes.saturating_add(1);
        self.bytes_written = self.bytes_written.saturating_add(bytes as u64);
    }
}

/// Storage wrapper adding read-only enforcement and usage accounting.
///
/// Does not own the backend in any stronger sense than `B` does: wrap a
/// `&mut S` or an `Rc<RefCell<S>>` to meter a store that is used elsewhere.
pub struct MeteredStorage<B: Storage> {
    backend: B,
    read_only: bool,
    usage: StorageUsage,
}

impl<B: Storage> MeteredStorage<B> {
    /// Creates a metering layer that forwards mutations.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            read_only: false,
            usage: StorageUsage::default(),
        }
    }

    /// Creates a metering layer that rejects every mutation.
    pub fn read_only(backend: B) -> Self {
        Self {
            read_only: true,
            ..Self::new(backend)
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Counters accumulated since construction or the last reset.
    pub fn usage(&self) -> StorageUsage {
        self.usage
    }

    /// Returns the counters and zeroes them.
    pub fn reset_usage(&mut self) -> StorageUsage {
        std::mem::take(&mut self.usage)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Unwraps the layer, returning the backend and final counters.
    pub fn into_parts(self) -> (B, StorageUsage) {
        (self.backend, self.usage)
    }

    fn guard(&self, operation: &'static str) -> Result<(), StorageError> {
        if self.read_only {
            warn!("read-only storage rejected {}", operation);
            return Err(StorageError::ReadOnly { operation });
        }
        Ok(())
    }

    fn count_read(&mut self, value: &Option<Value>) {
        self.usage
            .read(value.as_ref().map(Encode::encoded_len).unwrap_or(0));
    }
}

impl<B: Storage> Storage for MeteredStorage<B> {
    fn read(&mut self, contract: &ContractAddress, slot: u64) -> Result<Option<Value>, StorageError> {
        let value = self.backend.read(contract, slot)?;
        self.count_read(&value);
        Ok(value)
    }

    fn read_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
    ) -> Result<Option<Value>, StorageError> {
        let value = self.backend.read_key(contract, slot, key)?;
        self.count_read(&value);
        Ok(value)
    }

    fn write(&mut self, contract: &ContractAddress, slot: u64, value: Value) -> Result<(), StorageError> {
        self.guard("write")?;
        let bytes = value.encoded_len();
        self.backend.write(contract, slot, value)?;
        self.usage.write(bytes);
        Ok(())
    }

    fn write_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
        value: Value,
    ) -> Result<(), StorageError> {
        self.guard("write_key")?;
        let bytes = value.encoded_len();
        self.backend.write_key(contract, slot, key, value)?;
        self.usage.write(bytes);
        Ok(())
    }

    fn erase(&mut self, contract: &ContractAddress, slot: u64) -> Result<(), StorageError> {
        self.guard("erase")?;
        self.backend.erase(contract, slot)?;
        self.usage.write(0);
        Ok(())
    }

    fn erase_key(&mut self, contract: &ContractAddress, slot: u64, key: u64) -> Result<(), StorageError> {
        self.guard("erase_key")?;
        self.backend.erase_key(contract, slot, key)?;
        self.usage.write(0);
        Ok(())
    }

    fn add_key(&mut self, contract: &ContractAddress, slot: u64) -> Result<bool, StorageError> {
        self.guard("add_key")?;
        let created = self.backend.add_key(contract, slot)?;
        self.usage.write(0);
        Ok(created)
    }

    fn lookup_candidates(
        &mut self,
        contract: &ContractAddress,
        value: &Value,
    ) -> Result<Vec<CellRef>, StorageError> {
        let candidates = self.backend.lookup_candidates(contract, value)?;
        self.usage.read(value.encoded_len());
        Ok(candidates)
    }
}

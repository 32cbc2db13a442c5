//! Contract storage abstraction.
//!
//! Defines the [`Storage`] trait every layer implements. All operations are
//! scoped to one contract address; there is no cross-contract visibility.
//! Ordinary misses are `Ok(None)`, never errors.

use crate::types::address::{CellRef, ContractAddress};
use crate::types::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

/// Errors that can occur while interacting with storage layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A mutating call reached a layer configured read-only.
    #[error("storage is read-only: {operation} rejected")]
    ReadOnly { operation: &'static str },
    /// The durable backend failed; not recoverable inside an execution.
    #[error("backend failure: {0}")]
    Backend(String),
    /// A stored value could not be decoded.
    #[error("corrupt stored value: {0}")]
    Decode(String),
}

impl StorageError {
    /// Backend faults abort the whole execution attempt rather than the call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Backend(_) | StorageError::Decode(_))
    }
}

/// Two-level keyed store scoped per contract.
///
/// Implemented by [`InMemoryStorage`](super::memory_storage::InMemoryStorage),
/// [`CachingStorage`](super::caching_storage::CachingStorage) and
/// [`MeteredStorage`](super::metered_storage::MeteredStorage); layers compose
/// by wrapping. Reads take `&mut self` because caching and metering layers
/// record them.
pub trait Storage {
    /// Reads the root cell of `slot`.
    fn read(&mut self, contract: &ContractAddress, slot: u64) -> Result<Option<Value>, StorageError>;

    /// Reads entry `key` under `slot`.
    fn read_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
    ) -> Result<Option<Value>, StorageError>;

    /// Replaces the root cell of `slot`.
    fn write(&mut self, contract: &ContractAddress, slot: u64, value: Value) -> Result<(), StorageError>;

    /// Replaces entry `key` under `slot`.
    fn write_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
        value: Value,
    ) -> Result<(), StorageError>;

    /// Removes the root cell of `slot` and every keyed entry under it.
    fn erase(&mut self, contract: &ContractAddress, slot: u64) -> Result<(), StorageError>;

    /// Removes entry `key` under `slot`.
    fn erase_key(&mut self, contract: &ContractAddress, slot: u64, key: u64) -> Result<(), StorageError>;

    /// Allocates or confirms a keyed root at `slot`.
    ///
    /// An absent root is created holding an empty [`Value::Map`]; an existing
    /// root is left untouched. Returns `true` when the root was created.
    fn add_key(&mut self, contract: &ContractAddress, slot: u64) -> Result<bool, StorageError>;

    /// Every cell currently holding `value`, most recently written first.
    fn lookup_candidates(
        &mut self,
        contract: &ContractAddress,
        value: &Value,
    ) -> Result<Vec<CellRef>, StorageError>;

    /// Reverse lookup used for constant deduplication.
    ///
    /// When several cells hold an equal value, the most recently written one
    /// wins. Every implementation applies this same rule.
    fn lookup(&mut self, contract: &ContractAddress, value: &Value) -> Result<Option<CellRef>, StorageError> {
        Ok(self.lookup_candidates(contract, value)?.into_iter().next())
    }

    /// Reads any cell by reference.
    fn read_cell(&mut self, contract: &ContractAddress, cell: CellRef) -> Result<Option<Value>, StorageError> {
        match cell.key {
            None => self.read(contract, cell.slot),
            Some(key) => self.read_key(contract, cell.slot, key),
        }
    }

    /// Writes any cell by reference.
    fn write_cell(&mut self, contract: &ContractAddress, cell: CellRef, value: Value) -> Result<(), StorageError> {
        match cell.key {
            None => self.write(contract, cell.slot, value),
            Some(key) => self.write_key(contract, cell.slot, key, value),
        }
    }
}

/// Forwarding impl for single-owner chains (`CachingStorage<&mut InMemoryStorage>`).
impl<S: Storage + ?Sized> Storage for &mut S {
    fn read(&mut self, contract: &ContractAddress, slot: u64) -> Result<Option<Value>, StorageError> {
        (**self).read(contract, slot)
    }

    fn read_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
    ) -> Result<Option<Value>, StorageError> {
        (**self).read_key(contract, slot, key)
    }

    fn write(&mut self, contract: &ContractAddress, slot: u64, value: Value) -> Result<(), StorageError> {
        (**self).write(contract, slot, value)
    }

    fn write_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
        value: Value,
    ) -> Result<(), StorageError> {
        (**self).write_key(contract, slot, key, value)
    }

    fn erase(&mut self, contract: &ContractAddress, slot: u64) -> Result<(), StorageError> {
        (**self).erase(contract, slot)
    }

    fn erase_key(&mut self, contract: &ContractAddress, slot: u64, key: u64) -> Result<(), StorageError> {
        (**self).erase_key(contract, slot, key)
    }

    fn add_key(&mut self, contract: &ContractAddress, slot: u64) -> Result<bool, StorageError> {
        (**self).add_key(contract, slot)
    }

    fn lookup_candidates(
        &mut self,
        contract: &ContractAddress,
        value: &Value,
    ) -> Result<Vec<CellRef>, StorageError> {
        (**self).lookup_candidates(contract, value)
    }
}

/// Shared handle for layers that legitimately share one backend, e.g. nested
/// metering. Single-threaded: the borrow is held only for one call.
impl<S: Storage> Storage for Rc<RefCell<S>> {
    fn read(&mut self, contract: &ContractAddress, slot: u64) -> Result<Option<Value>, StorageError> {
        self.borrow_mut().read(contract, slot)
    }

    fn read_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
    ) -> Result<Option<Value>, StorageError> {
        self.borrow_mut().read_key(contract, slot, key)
    }

    fn write(&mut self, contract: &ContractAddress, slot: u64, value: Value) -> Result<(), StorageError> {
        self.borrow_mut().write(contract, slot, value)
    }

    fn write_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
        value: Value,
    ) -> Result<(), StorageError> {
        self.borrow_mut().write_key(contract, slot, key, value)
    }

    fn erase(&mut self, contract: &ContractAddress, slot: u64) -> Result<(), StorageError> {
        self.borrow_mut().erase(contract, slot)
    }

    fn erase_key(&mut self, contract: &ContractAddress, slot: u64, key: u64) -> Result<(), StorageError> {
        self.borrow_mut().erase_key(contract, slot, key)
    }

    fn add_key(&mut self, contract: &ContractAddress, slot: u64) -> Result<bool, StorageError> {
        self.borrow_mut().add_key(contract, slot)
    }

    fn lookup_candidates(
        &mut self,
        contract: &ContractAddress,
        value: &Value,
    ) -> Result<Vec<CellRef>, StorageError> {
        self.borrow_mut().lookup_candidates(contract, value)
    }
}

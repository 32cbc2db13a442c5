//! Shared fixtures for storage and interpreter tests.

use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::address::{CellRef, ContractAddress};
use crate::types::value::Value;

pub fn contract() -> ContractAddress {
    ContractAddress::derive(b"test-contract")
}

pub fn other_contract() -> ContractAddress {
    ContractAddress::derive(b"other-contract")
}

/// Backend whose every call fails with a durable-store fault.
pub struct FaultyStorage;

fn fault<T>() -> Result<T, StorageError> {
    Err(StorageError::Backend("disk unavailable".into()))
}

impl Storage for FaultyStorage {
    fn read(&mut self, _: &ContractAddress, _: u64) -> Result<Option<Value>, StorageError> {
        fault()
    }

    fn read_key(&mut self, _: &ContractAddress, _: u64, _: u64) -> Result<Option<Value>, StorageError> {
        fault()
    }

    fn write(&mut self, _: &ContractAddress, _: u64, _: Value) -> Result<(), StorageError> {
        fault()
    }

    fn write_key(&mut self, _: &ContractAddress, _: u64, _: u64, _: Value) -> Result<(), StorageError> {
        fault()
    }

    fn erase(&mut self, _: &ContractAddress, _: u64) -> Result<(), StorageError> {
        fault()
    }

    fn erase_key(&mut self, _: &ContractAddress, _: u64, _: u64) -> Result<(), StorageError> {
        fault()
    }

    fn add_key(&mut self, _: &ContractAddress, _: u64) -> Result<bool, StorageError> {
        fault()
    }

    fn lookup_candidates(&mut self, _: &ContractAddress, _: &Value) -> Result<Vec<CellRef>, StorageError> {
        fault()
    }
}

/// Empty backend that serves reads but fails every mutation, so faults
/// surface only when a caching layer commits.
pub struct FailingWrites;

impl Storage for FailingWrites {
    fn read(&mut self, _: &ContractAddress, _: u64) -> Result<Option<Value>, StorageError> {
        Ok(None)
    }

    fn read_key(&mut self, _: &ContractAddress, _: u64, _: u64) -> Result<Option<Value>, StorageError> {
        Ok(None)
    }

    fn write(&mut self, _: &ContractAddress, _: u64, _: Value) -> Result<(), StorageError> {
        fault()
    }

    fn write_key(&mut self, _: &ContractAddress, _: u64, _: u64, _: Value) -> Result<(), StorageError> {
        fault()
    }

    fn erase(&mut self, _: &ContractAddress, _: u64) -> Result<(), StorageError> {
        fault()
    }

    fn erase_key(&mut self, _: &ContractAddress, _: u64, _: u64) -> Result<(), StorageError> {
        fault()
    }

    fn add_key(&mut self, _: &ContractAddress, _: u64) -> Result<bool, StorageError> {
        fault()
    }

    fn lookup_candidates(&mut self, _: &ContractAddress, _: &Value) -> Result<Vec<CellRef>, StorageError> {
        Ok(Vec::new())
    }
}

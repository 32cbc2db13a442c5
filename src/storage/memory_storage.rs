//! Canonical in-memory backend.
//!
//! Owns every cell value directly. Used as the ultimate backend when no
//! durable store is attached, and as the reference behavior the caching
//! layer must reproduce after commit.

use crate::storage::dedup::DedupIndex;
use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::address::{CellRef, ContractAddress};
use crate::types::value::Value;
use std::collections::{BTreeMap, HashMap};

/// Cells and dedup index of one contract.
#[derive(Debug, Default, Clone)]
struct ContractCells {
    /// Ordered so a slot's root and keyed entries are contiguous.
    cells: BTreeMap<CellRef, Value>,
    index: DedupIndex,
}

impl ContractCells {
    fn put(&mut self, cell: CellRef, value: Value) {
        let old = self.cells.get(&cell);
        self.index.record_write(cell, old, &value);
        self.cells.insert(cell, value);
    }

    fn remove(&mut self, cell: CellRef) {
        if let Some(old) = self.cells.remove(&cell) {
            self.index.record_erase(cell, &old);
        }
    }

    fn remove_slot(&mut self, slot: u64) {
        let doomed: Vec<CellRef> = self
            .cells
            .range(CellRef::root(slot)..=CellRef::keyed(slot, u64::MAX))
            .map(|(cell, _)| *cell)
            .collect();
        for cell in doomed {
            self.remove(cell);
        }
    }
}

/// In-memory storage for every contract.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    contracts: HashMap<ContractAddress, ContractCells>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells held for `contract`.
    pub fn cell_count(&self, contract: &ContractAddress) -> usize {
        self.contracts
            .get(contract)
            .map(|c| c.cells.len())
            .unwrap_or(0)
    }

    /// Non-mutating read, for inspection outside an execution.
    pub fn get(&self, contract: &ContractAddress, cell: CellRef) -> Option<&Value> {
        self.contracts.get(contract)?.cells.get(&cell)
    }

    /// All cells of `contract` in canonical order.
    pub fn cells(&self, contract: &ContractAddress) -> Vec<(CellRef, Value)> {
        self.contracts
            .get(contract)
            .map(|c| c.cells.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    fn contract_mut(&mut self, contract: &ContractAddress) -> &mut ContractCells {
        self.contracts.entry(*contract).or_default()
    }
}

impl Storage for InMemoryStorage {
    fn read(&mut self, contract: &ContractAddress, slot: u64) -> Result<Option<Value>, StorageError> {
        Ok(self.get(contract, CellRef::root(slot)).cloned())
    }

    fn read_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self.get(contract, CellRef::keyed(slot, key)).cloned())
    }

    fn write(&mut self, contract: &ContractAddress, slot: u64, value: Value) -> Result<(), StorageError> {
        self.contract_mut(contract).put(CellRef::root(slot), value);
        Ok(())
    }

    fn write_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
        value: Value,
    ) -> Result<(), StorageError> {
        self.contract_mut(contract)
            .put(CellRef::keyed(slot, key), value);
        Ok(())
    }

    fn erase(&mut self, contract: &ContractAddress, slot: u64) -> Result<(), StorageError> {
        if let Some(cells) = self.contracts.get_mut(contract) {
            cells.remove_slot(slot);
        }
        Ok(())
    }

    fn erase_key(&mut self, contract: &ContractAddress, slot: u64, key: u64) -> Result<(), StorageError> {
        if let Some(cells) = self.contracts.get_mut(contract) {
            cells.remove(CellRef::keyed(slot, key));
        }
        Ok(())
    }

    fn add_key(&mut self, contract: &ContractAddress, slot: u64) -> Result<bool, StorageError> {
        let cells = self.contract_mut(contract);
        if cells.cells.contains_key(&CellRef::root(slot)) {
            return Ok(false);
        }
        cells.put(CellRef::root(slot), Value::Map(0));
        Ok(true)
    }

    fn lookup_candidates(
        &mut self,
        contract: &ContractAddress,
        value: &Value,
    ) -> Result<Vec<CellRef>, StorageError> {
        Ok(self
            .contracts
            .get(contract)
            .map(|c| c.index.candidates(value))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{contract, other_contract};

    #[test]
    fn absent_is_distinct_from_nil() {
        let mut storage = InMemoryStorage::new();
        let c = contract();
        assert_eq!(storage.read(&c, 1).unwrap(), None);
        storage.write(&c, 1, Value::Nil).unwrap();
        assert_eq!(storage.read(&c, 1).unwrap(), Some(Value::Nil));
    }

    #[test]
    fn contracts_are_isolated() {
        let mut storage = InMemoryStorage::new();
        storage.write(&contract(), 1, Value::int(7)).unwrap();
        assert_eq!(storage.read(&other_contract(), 1).unwrap(), None);
        assert_eq!(storage.lookup(&other_contract(), &Value::int(7)).unwrap(), None);
    }

    #[test]
    fn erase_slot_removes_keyed_entries_only_under_it() {
        let mut storage = InMemoryStorage::new();
        let c = contract();
        storage.add_key(&c, 4).unwrap();
        storage.write_key(&c, 4, 0, Value::int(1)).unwrap();
        storage.write_key(&c, 4, 9, Value::int(2)).unwrap();
        storage.write_key(&c, 5, 0, Value::int(3)).unwrap();

        storage.erase(&c, 4).unwrap();

        assert_eq!(storage.read(&c, 4).unwrap(), None);
        assert_eq!(storage.read_key(&c, 4, 0).unwrap(), None);
        assert_eq!(storage.read_key(&c, 4, 9).unwrap(), None);
        assert_eq!(storage.read_key(&c, 5, 0).unwrap(), Some(Value::int(3)));
        assert_eq!(storage.lookup(&c, &Value::int(1)).unwrap(), None);
    }

    #[test]
    fn erase_key_leaves_root() {
        let mut storage = InMemoryStorage::new();
        let c = contract();
        storage.add_key(&c, 2).unwrap();
        storage.write_key(&c, 2, 1, Value::from("x")).unwrap();
        storage.erase_key(&c, 2, 1).unwrap();
        assert_eq!(storage.read_key(&c, 2, 1).unwrap(), None);
        assert_eq!(storage.read(&c, 2).unwrap(), Some(Value::Map(0)));
    }

    #[test]
    fn add_key_allocates_then_confirms() {
        let mut storage = InMemoryStorage::new();
        let c = contract();
        assert!(storage.add_key(&c, 3).unwrap());
        storage.write(&c, 3, Value::Array(2)).unwrap();
        assert!(!storage.add_key(&c, 3).unwrap());
        assert_eq!(storage.read(&c, 3).unwrap(), Some(Value::Array(2)));
    }

    #[test]
    fn lookup_prefers_most_recent_write() {
        let mut storage = InMemoryStorage::new();
        let c = contract();
        let v = Value::from("shared");
        storage.write(&c, 1, v.clone()).unwrap();
        storage.write_key(&c, 7, 3, v.clone()).unwrap();
        for _ in 0..3 {
            assert_eq!(storage.lookup(&c, &v).unwrap(), Some(CellRef::keyed(7, 3)));
        }

        storage.write(&c, 1, v.clone()).unwrap();
        assert_eq!(storage.lookup(&c, &v).unwrap(), Some(CellRef::root(1)));

        storage.write(&c, 1, Value::Nil).unwrap();
        assert_eq!(storage.lookup(&c, &v).unwrap(), Some(CellRef::keyed(7, 3)));
    }
}

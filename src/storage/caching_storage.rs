//! Write-back caching layer.
//!
//! Buffers every mutation in an in-memory overlay and reads through to the
//! backend on a miss. The backend is never touched by a mutation before
//! [`CachingStorage::commit`], so an aborted execution is discarded by simply
//! dropping the layer.

use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::address::{CellAddress, CellRef, ContractAddress};
use crate::types::value::Value;
use crate::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// One overlay cell.
#[derive(Clone, Debug)]
struct OverlayEntry {
    /// Cell content as seen through this layer; `None` means absent.
    value: Option<Value>,
    /// Sequence of the last pending mutation, `None` for a clean cache fill.
    dirty: Option<u64>,
}

/// Pending mutations of a caching layer in canonical order.
///
/// Two executions that performed the same mutations produce equal change
/// sets regardless of the order they touched cells in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Slots erased together with all their keyed entries.
    pub wiped_slots: Vec<(ContractAddress, u64)>,
    /// Final state of every mutated cell; `None` means erased.
    pub cells: Vec<(CellAddress, Option<Value>)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.wiped_slots.is_empty() && self.cells.is_empty()
    }
}

/// Write-back overlay over a backend [`Storage`].
pub struct CachingStorage<B: Storage> {
    backend: B,
    entries: BTreeMap<CellAddress, OverlayEntry>,
    /// Slots erased in the overlay; reads under them must not fall through.
    wiped: BTreeSet<(ContractAddress, u64)>,
    next_seq: u64,
}

impl<B: Storage> CachingStorage<B> {
    /// Creates an empty overlay over `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            entries: BTreeMap::new(),
            wiped: BTreeSet::new(),
            next_seq: 0,
        }
    }

    /// Returns the wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of cells with a pending mutation.
    pub fn pending_len(&self) -> usize {
        self.entries.values().filter(|e| e.dirty.is_some()).count()
    }

    /// Returns `true` when a commit would change the backend.
    pub fn is_dirty(&self) -> bool {
        !self.wiped.is_empty() || self.pending_len() > 0
    }

    /// Lists pending mutations without applying them.
    pub fn change_set(&self) -> ChangeSet {
        ChangeSet {
            wiped_slots: self.wiped.iter().copied().collect(),
            cells: self
                .entries
                .iter()
                .filter(|(_, e)| e.dirty.is_some())
                .map(|(addr, e)| (*addr, e.value.clone()))
                .collect(),
        }
    }

    /// Applies every pending mutation to the backend.
    ///
    /// Slot wipes go first, then cell mutations in the order they were last
    /// made, so the backend ends up exactly as this layer reads and its dedup
    /// recency matches what [`Storage::lookup`] answered here. Returns the
    /// number of cell mutations applied. On a backend fault the overlay stays
    /// dirty and the backend may be partially written; the caller retries the
    /// whole attempt.
    pub fn commit(&mut self) -> Result<usize, StorageError> {
        for (contract, slot) in &self.wiped {
            self.backend.erase(contract, *slot)?;
        }

        let mut dirty: Vec<(u64, CellAddress)> = self
            .entries
            .iter()
            .filter_map(|(addr, e)| e.dirty.map(|seq| (seq, *addr)))
            .collect();
        dirty.sort_unstable_by_key(|(seq, _)| *seq);

        for (_, addr) in &dirty {
            let Some(entry) = self.entries.get(addr) else {
                continue;
            };
            match (&entry.value, addr.cell.key) {
                (Some(value), _) => {
                    self.backend
                        .write_cell(&addr.contract, addr.cell, value.clone())?;
                }
                // A root is only ever erased together with its slot.
                (None, None) => {}
                (None, Some(key)) => {
                    self.backend
                        .erase_key(&addr.contract, addr.cell.slot, key)?;
                }
            }
        }

        for entry in self.entries.values_mut() {
            entry.dirty = None;
        }
        let wiped = self.wiped.len();
        self.wiped.clear();
        info!(
            "committed {} cell mutations and {} slot wipes",
            dirty.len(),
            wiped
        );
        Ok(dirty.len())
    }

    /// Drops the overlay without touching the backend and returns it.
    pub fn discard(self) -> B {
        if self.is_dirty() {
            debug!("discarding {} pending cell mutations", self.pending_len());
        }
        self.backend
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn fetch(&mut self, contract: &ContractAddress, cell: CellRef) -> Result<Option<Value>, StorageError> {
        let addr = CellAddress::new(*contract, cell);
        if let Some(entry) = self.entries.get(&addr) {
            return Ok(entry.value.clone());
        }
        if self.wiped.contains(&(*contract, cell.slot)) {
            return Ok(None);
        }
        let value = self.backend.read_cell(contract, cell)?;
        self.entries.insert(
            addr,
            OverlayEntry {
                value: value.clone(),
                dirty: None,
            },
        );
        Ok(value)
    }

    fn stage(&mut self, contract: &ContractAddress, cell: CellRef, value: Option<Value>) {
        let seq = self.next_seq();
        self.entries.insert(
            CellAddress::new(*contract, cell),
            OverlayEntry {
                value,
                dirty: Some(seq),
            },
        );
    }

    fn contract_range(
        contract: &ContractAddress,
        from: CellRef,
        to: CellRef,
    ) -> std::ops::RangeInclusive<CellAddress> {
        CellAddress::new(*contract, from)..=CellAddress::new(*contract, to)
    }
}

impl<B: Storage> Storage for CachingStorage<B> {
    fn read(&mut self, contract: &ContractAddress, slot: u64) -> Result<Option<Value>, StorageError> {
        self.fetch(contract, CellRef::root(slot))
    }

    fn read_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
    ) -> Result<Option<Value>, StorageError> {
        self.fetch(contract, CellRef::keyed(slot, key))
    }

    fn write(&mut self, contract: &ContractAddress, slot: u64, value: Value) -> Result<(), StorageError> {
        self.stage(contract, CellRef::root(slot), Some(value));
        Ok(())
    }

    fn write_key(
        &mut self,
        contract: &ContractAddress,
        slot: u64,
        key: u64,
        value: Value,
    ) -> Result<(), StorageError> {
        self.stage(contract, CellRef::keyed(slot, key), Some(value));
        Ok(())
    }

    fn erase(&mut self, contract: &ContractAddress, slot: u64) -> Result<(), StorageError> {
        let doomed: Vec<CellAddress> = self
            .entries
            .range(Self::contract_range(
                contract,
                CellRef::root(slot),
                CellRef::keyed(slot, u64::MAX),
            ))
            .map(|(addr, _)| *addr)
            .collect();
        for addr in doomed {
            self.entries.remove(&addr);
        }
        self.wiped.insert((*contract, slot));
        self.stage(contract, CellRef::root(slot), None);
        Ok(())
    }

    fn erase_key(&mut self, contract: &ContractAddress, slot: u64, key: u64) -> Result<(), StorageError> {
        self.stage(contract, CellRef::keyed(slot, key), None);
        Ok(())
    }

    fn add_key(&mut self, contract: &ContractAddress, slot: u64) -> Result<bool, StorageError> {
        if self.fetch(contract, CellRef::root(slot))?.is_some() {
            return Ok(false);
        }
        self.stage(contract, CellRef::root(slot), Some(Value::Map(0)));
        Ok(true)
    }

    fn lookup_candidates(
        &mut self,
        contract: &ContractAddress,
        value: &Value,
    ) -> Result<Vec<CellRef>, StorageError> {
        let range = Self::contract_range(
            contract,
            CellRef::root(0),
            CellRef::keyed(u64::MAX, u64::MAX),
        );

        // Pending writes are newer than anything in the backend.
        let mut pending: Vec<(u64, CellRef)> = self
            .entries
            .range(range.clone())
            .filter_map(|(addr, e)| match (&e.value, e.dirty) {
                (Some(v), Some(seq)) if v == value => Some((seq, addr.cell)),
                _ => None,
            })
            .collect();
        pending.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let mut candidates: Vec<CellRef> = pending.into_iter().map(|(_, cell)| cell).collect();
        for cell in self.backend.lookup_candidates(contract, value)? {
            let shadowed = self.wiped.contains(&(*contract, cell.slot))
                || self
                    .entries
                    .get(&CellAddress::new(*contract, cell))
                    .is_some_and(|e| e.dirty.is_some());
            if !shadowed {
                candidates.push(cell);
            }
        }
        Ok(candidates)
    }
}

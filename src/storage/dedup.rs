//! Reverse index from value content to the cells holding it.
//!
//! Candidates are kept per digest in write order. The most recently written
//! cell is the canonical answer to a lookup; consensus depends on every layer
//! agreeing on that rule.

use crate::types::address::CellRef;
use crate::types::hash::Hash;
use crate::types::value::Value;
use std::collections::HashMap;

/// Per-contract dedup index.
#[derive(Debug, Default, Clone)]
pub struct DedupIndex {
    /// Cells per value digest, oldest write first.
    by_digest: HashMap<Hash, Vec<CellRef>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `cell` now holds `new`, replacing `old` if it held one.
    ///
    /// Rewriting the same value moves the cell to most recent.
    pub fn record_write(&mut self, cell: CellRef, old: Option<&Value>, new: &Value) {
        if let Some(old) = old {
            self.remove(cell, old.digest());
        }
        self.by_digest.entry(new.digest()).or_default().push(cell);
    }

    /// Records that `cell`, which held `old`, was erased.
    pub fn record_erase(&mut self, cell: CellRef, old: &Value) {
        self.remove(cell, old.digest());
    }

    /// Cells holding `value`, most recently written first.
    pub fn candidates(&self, value: &Value) -> Vec<CellRef> {
        self.by_digest
            .get(&value.digest())
            .map(|cells| cells.iter().rev().copied().collect())
            .unwrap_or_default()
    }

    /// Number of distinct values indexed.
    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    fn remove(&mut self, cell: CellRef, digest: Hash) {
        if let Some(cells) = self.by_digest.get_mut(&digest) {
            cells.retain(|c| *c != cell);
            if cells.is_empty() {
                self.by_digest.remove(&digest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_recent_write_first() {
        let mut index = DedupIndex::new();
        let v = Value::int(5);
        index.record_write(CellRef::root(1), None, &v);
        index.record_write(CellRef::root(2), None, &v);
        assert_eq!(
            index.candidates(&v),
            vec![CellRef::root(2), CellRef::root(1)]
        );
    }

    #[test]
    fn rewrite_same_value_moves_to_front() {
        let mut index = DedupIndex::new();
        let v = Value::int(5);
        index.record_write(CellRef::root(1), None, &v);
        index.record_write(CellRef::root(2), None, &v);
        index.record_write(CellRef::root(1), Some(&v), &v);
        assert_eq!(
            index.candidates(&v),
            vec![CellRef::root(1), CellRef::root(2)]
        );
    }

    #[test]
    fn overwrite_and_erase_remove_stale_entries() {
        let mut index = DedupIndex::new();
        let a = Value::from("a");
        let b = Value::from("b");
        index.record_write(CellRef::root(1), None, &a);
        index.record_write(CellRef::keyed(1, 3), None, &a);
        index.record_write(CellRef::root(1), Some(&a), &b);
        assert_eq!(index.candidates(&a), vec![CellRef::keyed(1, 3)]);

        index.record_erase(CellRef::keyed(1, 3), &a);
        assert!(index.candidates(&a).is_empty());
        assert_eq!(index.len(), 1);
    }
}

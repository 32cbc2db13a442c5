//! Interpreter address space.
//!
//! The flat 64-bit address space is split into independent arenas:
//!
//! | Range                | Region     | Index                               |
//! |----------------------|------------|-------------------------------------|
//! | `[0, 2^32)`          | constants  | constant-pool entry                 |
//! | `[2^32, 2^33)`       | stack      | slot of the active frame            |
//! | `[2^63, 2^64)`       | persistent | root slot of the bound contract     |
//!
//! Every other address is out of range.

use crate::types::value::Value;
use crate::virtual_machine::errors::VMError;
use std::fmt::Write;

pub const CONSTANT_BASE: u64 = 0;
pub const STACK_BASE: u64 = 1 << 32;
pub const STACK_END: u64 = 1 << 33;
pub const PERSISTENT_BASE: u64 = 1 << 63;

/// Decoded address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Constant(usize),
    /// Frame-relative stack slot.
    Stack(usize),
    /// Root slot in contract storage.
    Persistent(u64),
}

impl Region {
    pub fn resolve(address: u64) -> Result<Region, VMError> {
        if address >= PERSISTENT_BASE {
            Ok(Region::Persistent(address - PERSISTENT_BASE))
        } else if (STACK_BASE..STACK_END).contains(&address) {
            Ok(Region::Stack((address - STACK_BASE) as usize))
        } else if address < STACK_BASE {
            Ok(Region::Constant((address - CONSTANT_BASE) as usize))
        } else {
            Err(VMError::AddressOutOfRange { address })
        }
    }
}

/// Constant and stack arenas.
///
/// The stack grows with call frames and is bounded by `capacity`; slots of a
/// fresh frame always start as `Nil`.
#[derive(Debug, Default)]
pub struct Memory {
    constants: Vec<Value>,
    stack: Vec<Value>,
    capacity: usize,
}

impl Memory {
    pub fn new(capacity: usize) -> Self {
        Self {
            constants: Vec::new(),
            stack: Vec::new(),
            capacity,
        }
    }

    pub fn load_constants(&mut self, constants: &[Value]) {
        self.constants = constants.to_vec();
    }

    pub fn constant(&self, index: usize, address: u64) -> Result<&Value, VMError> {
        self.constants
            .get(index)
            .ok_or(VMError::AddressOutOfRange { address })
    }

    /// Reserves `size` slots at `base`, discarding anything above them.
    pub fn push_frame(&mut self, base: usize, size: usize) -> Result<(), VMError> {
        let needed = base.saturating_add(size);
        if needed > self.capacity {
            return Err(VMError::StackOverflow {
                needed,
                available: self.capacity,
            });
        }
        self.stack.truncate(base);
        self.stack.resize(needed, Value::Nil);
        Ok(())
    }

    /// Releases every slot from `base` upwards.
    pub fn pop_to(&mut self, base: usize) {
        self.stack.truncate(base);
    }

    pub fn slot(&self, absolute: usize, address: u64) -> Result<&Value, VMError> {
        self.stack
            .get(absolute)
            .ok_or(VMError::AddressOutOfRange { address })
    }

    pub fn set_slot(&mut self, absolute: usize, value: Value, address: u64) -> Result<(), VMError> {
        let slot = self
            .stack
            .get_mut(absolute)
            .ok_or(VMError::AddressOutOfRange { address })?;
        *slot = value;
        Ok(())
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Renders both arenas for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "constants ({}):", self.constants.len());
        for (i, v) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "  c[{i}] = {v}");
        }
        let _ = writeln!(out, "stack ({}/{}):", self.stack.len(), self.capacity);
        for (i, v) in self.stack.iter().enumerate() {
            let _ = writeln!(out, "  s[{i}] = {v}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_regions() {
        assert_eq!(Region::resolve(0).unwrap(), Region::Constant(0));
        assert_eq!(Region::resolve(STACK_BASE - 1).unwrap(), Region::Constant(u32::MAX as usize));
        assert_eq!(Region::resolve(STACK_BASE + 5).unwrap(), Region::Stack(5));
        assert_eq!(Region::resolve(PERSISTENT_BASE).unwrap(), Region::Persistent(0));
        assert_eq!(Region::resolve(u64::MAX).unwrap(), Region::Persistent(PERSISTENT_BASE - 1));
    }

    #[test]
    fn gap_is_out_of_range() {
        for address in [STACK_END, STACK_END + 1, PERSISTENT_BASE - 1] {
            assert_eq!(
                Region::resolve(address),
                Err(VMError::AddressOutOfRange { address })
            );
        }
    }

    #[test]
    fn frames_are_bounded_and_cleared() {
        let mut memory = Memory::new(4);
        memory.push_frame(0, 2).unwrap();
        memory.set_slot(1, Value::int(9), STACK_BASE + 1).unwrap();
        memory.push_frame(2, 2).unwrap();
        assert!(matches!(
            memory.push_frame(3, 2),
            Err(VMError::StackOverflow { needed: 5, available: 4 })
        ));
        memory.pop_to(2);
        memory.push_frame(1, 1).unwrap();
        assert_eq!(memory.slot(1, 0).unwrap(), &Value::Nil);
        assert_eq!(memory.stack_len(), 2);
    }

    #[test]
    fn missing_constant_reports_address() {
        let memory = Memory::new(1);
        assert_eq!(
            memory.constant(3, 3),
            Err(VMError::AddressOutOfRange { address: 3 })
        );
    }
}

use crate::types::address::ContractAddress;
use crate::virtual_machine::program::Binary;
use std::collections::HashMap;

/// Where execution starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryPoint {
    /// Method looked up by name in the binary's method table.
    Method(String),
    /// Method table index.
    Index(usize),
    /// Raw instruction offset with an explicit frame size; slot 0 is
    /// reported as the return value.
    Offset { offset: usize, frame_size: u32 },
}

impl From<&str> for EntryPoint {
    fn from(name: &str) -> Self {
        EntryPoint::Method(name.to_string())
    }
}

/// Resolves callee binaries for cross-contract calls.
pub trait ContractRegistry {
    fn binary(&self, contract: &ContractAddress) -> Option<&Binary>;
}

impl ContractRegistry for HashMap<ContractAddress, Binary> {
    fn binary(&self, contract: &ContractAddress) -> Option<&Binary> {
        self.get(contract)
    }
}

/// Call stack frame.
#[derive(Clone, Debug)]
pub(super) struct CallFrame {
    /// Absolute stack index of the frame's slot 0.
    pub(super) base: usize,
    /// Number of slots reserved for the frame.
    pub(super) size: usize,
    /// Instruction to resume after returning to the caller.
    pub(super) return_addr: usize,
    /// Absolute caller slot receiving the return value; `None` for the
    /// outermost frame.
    pub(super) return_slot: Option<usize>,
}

//! Instruction operands and their wire encoding.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::virtual_machine::vm::memory::{PERSISTENT_BASE, STACK_BASE};

/// One instruction operand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Unused operand position.
    #[default]
    None,
    /// Flat 64-bit interpreter address.
    Addr(u64),
    /// Integer immediate.
    Imm(u64),
}

impl Operand {
    /// Address of constant-pool entry `index`.
    pub const fn constant(index: u64) -> Self {
        Operand::Addr(index)
    }

    /// Address of slot `index` of the active stack frame.
    pub const fn stack(index: u64) -> Self {
        Operand::Addr(STACK_BASE.wrapping_add(index))
    }

    /// Address of persistent root slot `slot` of the bound contract.
    pub const fn persistent(slot: u64) -> Self {
        Operand::Addr(PERSISTENT_BASE.wrapping_add(slot))
    }

    pub const fn tag(&self) -> OperandTag {
        match self {
            Operand::None => OperandTag::None,
            Operand::Addr(_) => OperandTag::Addr,
            Operand::Imm(_) => OperandTag::Imm,
        }
    }

    /// Returns a human-readable kind name for error messages.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Operand::None => "nothing",
            Operand::Addr(_) => "an address",
            Operand::Imm(_) => "an immediate",
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandTag {
    None = 0,
    Addr = 1,
    Imm = 2,
}

impl TryFrom<u8> for OperandTag {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Addr),
            2 => Ok(Self::Imm),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl Encode for Operand {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (self.tag() as u8).encode(out);
        match self {
            Operand::None => {}
            Operand::Addr(v) | Operand::Imm(v) => v.encode(out),
        }
    }
}

impl Decode for Operand {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(match OperandTag::try_from(u8::decode(input)?)? {
            OperandTag::None => Operand::None,
            OperandTag::Addr => Operand::Addr(u64::decode(input)?),
            OperandTag::Imm => Operand::Imm(u64::decode(input)?),
        })
    }
}

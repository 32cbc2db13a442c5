//! Interpreter abort causes and the structured record reported to callers.

use crate::storage::storage_trait::StorageError;
use crate::types::address::ContractAddress;
use crate::types::encoding::DecodeError;
use thiserror::Error;

/// Reasons the interpreter stops dispatching before a successful return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    /// Charging the next cost would exceed the credit budget.
    #[error("out of credits: needed {needed} with {remaining} of {budget} remaining")]
    OutOfCredits {
        needed: u64,
        remaining: u64,
        budget: u64,
    },
    /// Opcode byte that maps to no instruction.
    #[error("invalid opcode 0x{opcode:02x}")]
    InvalidOpcode { opcode: u8 },
    /// Address outside every region, or outside the active part of one.
    #[error("address {address:#x} out of range")]
    AddressOutOfRange { address: u64 },
    /// Attempt to overwrite the constant region.
    #[error("constant at {address:#x} is read-only")]
    ConstantWrite { address: u64 },
    /// Operand value of the wrong type for the instruction.
    #[error("{instruction} expected {expected} but got {actual}")]
    TypeMismatch {
        instruction: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// Operand encoded with the wrong kind (address vs immediate).
    #[error("{instruction} operand {index} must be {expected}")]
    InvalidOperand {
        instruction: &'static str,
        index: usize,
        expected: &'static str,
    },
    #[error("undefined method {method}")]
    UndefinedMethod { method: String },
    #[error("method {method} takes {expected} arguments, got {actual}")]
    ArityMismatch {
        method: String,
        expected: u64,
        actual: u64,
    },
    #[error("unknown contract {0}")]
    UnknownContract(ContractAddress),
    #[error("jump target {target} outside code of length {len}")]
    InvalidJump { target: u64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("call depth limit {limit} exceeded")]
    CallDepthExceeded { limit: usize },
    #[error("stack overflow: {needed} slots needed, {available} available")]
    StackOverflow { needed: usize, available: usize },
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: u64, len: u64 },
    /// Mutation attempted by a constant-only execution.
    #[error("read-only execution rejected {instruction}")]
    ReadOnlyViolation { instruction: &'static str },
    /// `run` called before `begin`, or after termination.
    #[error("interpreter is not running")]
    NotRunning,
    #[error("storage: {0}")]
    Storage(StorageError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
}

impl From<StorageError> for VMError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ReadOnly { operation } => VMError::ReadOnlyViolation {
                instruction: operation,
            },
            other => VMError::Storage(other),
        }
    }
}

/// Stable numeric identifiers for abort causes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    OutOfCredits = 1,
    InvalidOpcode = 2,
    AddressOutOfRange = 3,
    ConstantWrite = 4,
    TypeMismatch = 5,
    InvalidOperand = 6,
    UndefinedMethod = 7,
    ArityMismatch = 8,
    UnknownContract = 9,
    InvalidJump = 10,
    DivisionByZero = 11,
    CallDepthExceeded = 12,
    StackOverflow = 13,
    IndexOutOfBounds = 14,
    ReadOnlyViolation = 15,
    NotRunning = 16,
    Storage = 17,
    Decode = 18,
}

impl ErrorCode {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl VMError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            VMError::OutOfCredits { .. } => ErrorCode::OutOfCredits,
            VMError::InvalidOpcode { .. } => ErrorCode::InvalidOpcode,
            VMError::AddressOutOfRange { .. } => ErrorCode::AddressOutOfRange,
            VMError::ConstantWrite { .. } => ErrorCode::ConstantWrite,
            VMError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            VMError::InvalidOperand { .. } => ErrorCode::InvalidOperand,
            VMError::UndefinedMethod { .. } => ErrorCode::UndefinedMethod,
            VMError::ArityMismatch { .. } => ErrorCode::ArityMismatch,
            VMError::UnknownContract(_) => ErrorCode::UnknownContract,
            VMError::InvalidJump { .. } => ErrorCode::InvalidJump,
            VMError::DivisionByZero => ErrorCode::DivisionByZero,
            VMError::CallDepthExceeded { .. } => ErrorCode::CallDepthExceeded,
            VMError::StackOverflow { .. } => ErrorCode::StackOverflow,
            VMError::IndexOutOfBounds { .. } => ErrorCode::IndexOutOfBounds,
            VMError::ReadOnlyViolation { .. } => ErrorCode::ReadOnlyViolation,
            VMError::NotRunning => ErrorCode::NotRunning,
            VMError::Storage(_) => ErrorCode::Storage,
            VMError::Decode(_) => ErrorCode::Decode,
        }
    }

    /// Backend faults end the execution attempt instead of producing a record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VMError::Storage(e) if e.is_fatal())
    }

    /// Memory address the error refers to, when there is one.
    pub const fn address(&self) -> Option<u64> {
        match self {
            VMError::AddressOutOfRange { address } | VMError::ConstantWrite { address } => {
                Some(*address)
            }
            _ => None,
        }
    }
}

/// Abort report handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    /// Memory address involved, if any.
    pub address: Option<u64>,
    /// Instruction index of the failing instruction.
    pub offset: usize,
    /// Source line from the binary's line table, 0 when unknown.
    pub line: u32,
    /// Human-readable message, at most `max_len` bytes.
    pub message: String,
}

impl ErrorRecord {
    pub fn new(err: &VMError, offset: usize, line: u32, max_len: usize) -> Self {
        Self {
            code: err.code(),
            address: err.address(),
            offset,
            line,
            message: truncate_utf8(err.to_string(), max_len),
        }
    }
}

/// Cuts `s` to at most `max` bytes without splitting a character.
fn truncate_utf8(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

//! Compiled binary representation and serialization.
//!
//! A [`Binary`] is what the external compiler hands the engine: ordered
//! instructions, a constant pool, a method table and an optional line table.
//! Nothing here is trusted at run time; the interpreter re-checks addresses,
//! opcodes and types while executing.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::value::Value;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::Operand;
use std::path::Path;
use thiserror::Error;

/// Magic bytes identifying a serialized contract binary.
const MAGIC: &[u8; 5] = b"CVM_B";

/// Current binary format version.
const CURRENT_VERSION: Version = Version::new(1, 0, 0);

/// Semantic version for binary format compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    major: u8,
    minor: u8,
    patch: u8,
}

impl Version {
    const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Encode for Version {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.major.encode(out);
        self.minor.encode(out);
        self.patch.encode(out);
    }
}

impl Decode for Version {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self::new(
            u8::decode(input)?,
            u8::decode(input)?,
            u8::decode(input)?,
        ))
    }
}

/// Errors raised while loading a binary.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(Version),
    #[error("trailing bytes after binary")]
    TrailingBytes,
    #[error("decoding error: {0}")]
    Decode(#[from] DecodeError),
}

/// One encoded instruction.
///
/// The opcode is kept raw: an unknown byte loads fine and aborts only if
/// execution reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub opcode: u8,
    pub operands: [Operand; 3],
}

impl Instr {
    pub fn new(instruction: Instruction, operands: &[Operand]) -> Self {
        let mut ops = [Operand::None; 3];
        for (slot, op) in ops.iter_mut().zip(operands) {
            *slot = *op;
        }
        Self {
            opcode: instruction as u8,
            operands: ops,
        }
    }
}

impl Encode for Instr {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.opcode.encode(out);
        for op in &self.operands {
            op.encode(out);
        }
    }
}

impl Decode for Instr {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            opcode: u8::decode(input)?,
            operands: [
                Operand::decode(input)?,
                Operand::decode(input)?,
                Operand::decode(input)?,
            ],
        })
    }
}

/// Method table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    /// Instruction index of the first instruction.
    pub entry: usize,
    /// Stack slots reserved for a call: return slot, arguments, locals.
    pub frame_size: u32,
    pub arity: u32,
    /// `false` for void methods.
    pub returns: bool,
}

impl Method {
    /// Frame size actually reserved: never smaller than return slot plus arguments.
    pub fn effective_frame_size(&self) -> usize {
        (self.frame_size as usize).max(self.arity as usize + 1)
    }
}

impl Encode for Method {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.name.encode(out);
        self.entry.encode(out);
        self.frame_size.encode(out);
        self.arity.encode(out);
        self.returns.encode(out);
    }
}

impl Decode for Method {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            name: String::decode(input)?,
            entry: usize::decode(input)?,
            frame_size: u32::decode(input)?,
            arity: u32::decode(input)?,
            returns: bool::decode(input)?,
        })
    }
}

/// Compiled contract binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binary {
    /// Values preloaded into the constant region, index = address.
    pub constants: Vec<Value>,
    pub code: Vec<Instr>,
    pub methods: Vec<Method>,
    /// Source line per instruction; may be shorter than `code` or empty.
    pub lines: Vec<u32>,
}

impl Binary {
    pub fn method_by_name(&self, name: &str) -> Option<(usize, &Method)> {
        self.methods
            .iter()
            .enumerate()
            .find(|(_, m)| m.name == name)
    }

    /// Source line of instruction `offset`, 0 when unknown.
    pub fn line_of(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    /// Serializes the binary with a magic header and version.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        MAGIC.encode(&mut out);
        CURRENT_VERSION.encode(&mut out);
        self.encode(&mut out);
        out
    }

    /// Deserializes a binary, rejecting foreign data, other format versions
    /// and trailing bytes.
    pub fn from_bytes(mut input: &[u8]) -> Result<Self, LoadError> {
        if input.len() < MAGIC.len() || &<[u8; 5]>::decode(&mut input)? != MAGIC {
            return Err(LoadError::BadMagic);
        }

        let version = Version::decode(&mut input)?;
        if version != CURRENT_VERSION {
            return Err(LoadError::UnsupportedVersion(version));
        }

        let binary = Binary::decode(&mut input)?;
        if !input.is_empty() {
            return Err(LoadError::TrailingBytes);
        }
        Ok(binary)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

impl Encode for Binary {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.constants.encode(out);
        self.code.encode(out);
        self.methods.encode(out);
        self.lines.encode(out);
    }
}

impl Decode for Binary {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            constants: Vec::decode(input)?,
            code: Vec::decode(input)?,
            methods: Vec::decode(input)?,
            lines: Vec::decode(input)?,
        })
    }
}

/// Emits binaries without a compiler, for tests and the debug runner.
#[derive(Debug, Default)]
pub struct BinaryBuilder {
    binary: Binary,
    line: u32,
}

impl BinaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a constant and returns its constant-region address.
    pub fn constant(&mut self, value: impl Into<Value>) -> u64 {
        self.binary.constants.push(value.into());
        (self.binary.constants.len() - 1) as u64
    }

    /// Starts a method at the next instruction and returns its index.
    pub fn method(&mut self, name: &str, frame_size: u32, arity: u32, returns: bool) -> u64 {
        self.binary.methods.push(Method {
            name: name.to_string(),
            entry: self.binary.code.len(),
            frame_size,
            arity,
            returns,
        });
        (self.binary.methods.len() - 1) as u64
    }

    /// Sets the source line recorded for subsequent instructions.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    /// Index the next emitted instruction will get.
    pub fn here(&self) -> u64 {
        self.binary.code.len() as u64
    }

    pub fn emit(&mut self, instruction: Instruction, operands: &[Operand]) -> &mut Self {
        self.emit_raw(Instr::new(instruction, operands))
    }

    /// Emits an instruction verbatim, including unknown opcodes.
    pub fn emit_raw(&mut self, instr: Instr) -> &mut Self {
        self.binary.code.push(instr);
        self.binary.lines.push(self.line);
        self
    }

    /// Rewrites operand `index` of an already emitted instruction.
    pub fn patch(&mut self, at: u64, index: usize, operand: Operand) -> &mut Self {
        if let Some(instr) = self.binary.code.get_mut(at as usize) {
            if let Some(slot) = instr.operands.get_mut(index) {
                *slot = operand;
            }
        }
        self
    }

    pub fn build(self) -> Binary {
        self.binary
    }
}

//! Stack-based bytecode interpreter for contract execution.
//!
//! # Architecture
//!
//! - **Address space**: constants, frame-relative stack slots and the bound
//!   contract's persistent root slots share one flat 64-bit address space
//! - **Instruction format**: one opcode byte and three tagged operands
//! - **Execution model**: arithmetic, comparison, branching, local and
//!   cross-contract calls, and typed storage containers (maps, arrays,
//!   references)
//! - **Credit metering**: every instruction and every stored byte is charged
//!   against a budget, with per-category profiling
//!
//! # Modules
//!
//! - [`errors`]: abort causes and the caller-facing error record
//! - [`isa`]: instruction set definition and opcode mappings
//! - [`operand`]: operand kinds and their encoding
//! - [`program`]: binary container format and builder
//! - [`vm`]: the interpreter, its memory arenas and credit meter

pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod program;
pub mod vm;

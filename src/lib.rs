//! Deterministic contract execution engine.
//!
//! Runs contract bytecode in a credit-metered stack interpreter over layered
//! per-contract storage: an in-memory backend, a write-back cache committed
//! only on success, and a metering layer that enforces read-only calls.

pub mod core;
pub mod storage;
pub mod types;
pub mod utils;
pub mod virtual_machine;

//! Core type definitions shared by storage and the interpreter.
//!
//! - `encoding`: deterministic binary serialization and size counting
//! - `hash`: fixed-size 32-byte SHA3-256 hashes
//! - `address`: contract addresses and (slot, key) cell references
//! - `value`: the tagged value held by every cell

pub mod address;
pub mod encoding;
pub mod hash;
pub mod value;

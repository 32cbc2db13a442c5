//! Engine entry points.
//!
//! - `config`: interpreter limits, cost parameters and fee schedule
//! - `execution`: one contract call against layered storage, committed on
//!   success and discarded otherwise

pub mod config;
pub mod execution;

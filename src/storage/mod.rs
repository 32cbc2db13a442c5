//! Contract storage subsystem.
//!
//! Layers compose by wrapping, leaves first:
//!
//! - [`storage_trait`]: the [`Storage`](storage_trait::Storage) trait and [`StorageError`](storage_trait::StorageError)
//! - [`dedup`]: reverse value index backing `lookup`
//! - [`memory_storage`]: canonical in-memory backend
//! - [`caching_storage`]: write-back overlay flushed on commit
//! - [`metered_storage`]: read-only guard and usage counters

pub mod caching_storage;
pub mod dedup;
pub mod memory_storage;
pub mod metered_storage;
pub mod storage_trait;
#[cfg(test)]
pub(crate) mod test_support;

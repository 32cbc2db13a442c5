//! Engine configuration and fee schedule.
//!
//! Everything that decides credits or aborts (opcode and byte costs, stack
//! and call-depth limits, address regions, binary format) is compiled in.
//! Only reporting and pricing live here.

use crate::storage::metered_storage::StorageUsage;
use crate::utils::log::{self, Level};
use crate::warn;
use std::str::FromStr;

/// Prices turning credits and storage usage into a fee.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Price per credit consumed.
    pub credit_price: u64,
    /// Price per serialized byte read from storage.
    pub read_byte_price: u64,
    /// Price per serialized byte written to storage.
    pub write_byte_price: u64,
    /// Flat price per storage read.
    pub per_read: u64,
    /// Flat price per storage write.
    pub per_write: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            credit_price: 1,
            read_byte_price: 1,
            write_byte_price: 10,
            per_read: 5,
            per_write: 50,
        }
    }
}

impl FeeSchedule {
    /// Deterministic fee for one call; saturates instead of overflowing.
    pub fn fee(&self, credits_used: u64, usage: &StorageUsage) -> u64 {
        [
            credits_used.saturating_mul(self.credit_price),
            usage.bytes_read.saturating_mul(self.read_byte_price),
            usage.bytes_written.saturating_mul(self.write_byte_price),
            usage.reads.saturating_mul(self.per_read),
            usage.writes.saturating_mul(self.per_write),
        ]
        .into_iter()
        .fold(0u64, u64::saturating_add)
    }
}

/// Node-local engine settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on [`ErrorRecord`](crate::virtual_machine::errors::ErrorRecord) messages, in bytes.
    pub max_error_message_len: usize,
    pub log_level: Level,
    pub fees: FeeSchedule,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_error_message_len: 256,
            log_level: Level::Info,
            fees: FeeSchedule::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_error_message_len(mut self, len: usize) -> Self {
        self.max_error_message_len = len;
        self
    }

    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    /// Defaults overlaid with `ENGINE_LOG_LEVEL` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values returned by `lookup`; unparsable values
    /// are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "ENGINE_LOG_LEVEL") {
            config.log_level = v;
        }
        config
    }

    /// Installs `log_level` as the process-wide logging threshold.
    pub fn apply_logging(&self) {
        log::set_min_level(self.log_level);
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring invalid {}={}", key, raw);
            None
        }
    }
}

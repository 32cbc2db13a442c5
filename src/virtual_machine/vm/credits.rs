use crate::virtual_machine::errors::VMError;

/// Number of credit categories tracked by [`CreditProfile`].
const CREDIT_CATEGORY_COUNT: usize = 4;

/// Categories of credit consumption for profiling and fee breakdowns.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CreditCategory {
    /// Base cost of each executed instruction.
    Opcode = 0,
    /// Byte-proportional cost of values read from storage.
    StorageRead = 1,
    /// Byte-proportional cost of values written to storage.
    StorageWrite = 2,
    /// Per-argument cost of local and cross-contract calls.
    CallOverhead = 3,
}

impl CreditCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CreditCategory::Opcode => "Opcode",
            CreditCategory::StorageRead => "Storage Read",
            CreditCategory::StorageWrite => "Storage Write",
            CreditCategory::CallOverhead => "Call Overhead",
        }
    }

    /// All categories in discriminant order.
    const ALL: [CreditCategory; CREDIT_CATEGORY_COUNT] = [
        CreditCategory::Opcode,
        CreditCategory::StorageRead,
        CreditCategory::StorageWrite,
        CreditCategory::CallOverhead,
    ];
}

/// Credit consumption per category.
///
/// Backed by a flat array indexed by [`CreditCategory`] discriminant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreditProfile {
    counts: [u64; CREDIT_CATEGORY_COUNT],
}

impl CreditProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn add(&mut self, category: CreditCategory, amount: u64) {
        let slot = &mut self.counts[category as usize];
        *slot = slot.saturating_add(amount);
    }

    pub fn get(&self, category: CreditCategory) -> u64 {
        self.counts[category as usize]
    }

    /// Returns the total across all categories.
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |acc, &v| acc.saturating_add(v))
    }

    /// Adds every category of `other` into `self`.
    pub fn merge(&mut self, other: &CreditProfile) {
        for (category, amount) in other.iter() {
            self.add(category, amount);
        }
    }

    /// Returns an iterator over all categories and their consumption.
    pub fn iter(&self) -> impl Iterator<Item = (CreditCategory, u64)> {
        CreditCategory::ALL.into_iter().zip(self.counts)
    }
}

/// Credit budget of one execution.
///
/// A charge that does not fit is rejected whole and leaves the meter
/// untouched, so `used` never exceeds `budget`.
#[derive(Clone, Debug)]
pub struct CreditMeter {
    budget: u64,
    used: u64,
    profile: CreditProfile,
}

impl CreditMeter {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            used: 0,
            profile: CreditProfile::new(),
        }
    }

    pub fn charge(&mut self, amount: u64, category: CreditCategory) -> Result<(), VMError> {
        let remaining = self.remaining();
        if amount > remaining {
            return Err(VMError::OutOfCredits {
                needed: amount,
                remaining,
                budget: self.budget,
            });
        }
        self.used += amount;
        self.profile.add(category, amount);
        Ok(())
    }

    /// Books consumption already bounded by this meter's remaining credits,
    /// as reported by a nested execution.
    pub fn absorb(&mut self, used: u64, profile: &CreditProfile) {
        self.used = self.used.saturating_add(used).min(self.budget);
        self.profile.merge(profile);
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.budget - self.used
    }

    pub fn profile(&self) -> &CreditProfile {
        &self.profile
    }
}

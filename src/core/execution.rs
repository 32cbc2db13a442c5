//! Execution sessions.
//!
//! [`execute_call`] runs one contract call against a backend: the backend is
//! wrapped in a [`CachingStorage`] so nothing reaches it until the call
//! succeeds, and the cache is wrapped in a [`MeteredStorage`] that counts
//! traffic for the fee and enforces read-only calls.

use crate::core::config::EngineConfig;
use crate::storage::caching_storage::CachingStorage;
use crate::storage::metered_storage::{MeteredStorage, StorageUsage};
use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::address::ContractAddress;
use crate::types::value::Value;
use crate::virtual_machine::errors::{ErrorRecord, VMError};
use crate::virtual_machine::program::Binary;
use crate::virtual_machine::vm::Interpreter;
use crate::virtual_machine::vm::context::{ContractRegistry, EntryPoint};
use crate::virtual_machine::vm::credits::CreditProfile;
use crate::{info, warn};
use thiserror::Error;

/// Failures that end an execution attempt without an outcome.
///
/// Contract aborts are not engine errors; they are reported in
/// [`CallOutcome::error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The durable backend failed while executing or committing.
    #[error("backend fault: {0}")]
    Backend(StorageError),
    /// The call names no method of the binary.
    #[error("invalid entry point: {0}")]
    InvalidEntry(String),
}

/// One contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallParams {
    pub contract: ContractAddress,
    pub entry: EntryPoint,
    pub args: Vec<Value>,
    /// Credit budget of the whole call, nested calls included.
    pub credits: u64,
    /// Rejects every storage mutation and never commits.
    pub read_only: bool,
    /// Captures the interpreter's memory in [`CallOutcome::memory_dump`].
    pub dump_memory: bool,
}

impl CallParams {
    pub fn new(contract: ContractAddress, entry: impl Into<EntryPoint>, credits: u64) -> Self {
        Self {
            contract,
            entry: entry.into(),
            args: Vec::new(),
            credits,
            read_only: false,
            dump_memory: false,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_memory_dump(mut self) -> Self {
        self.dump_memory = true;
        self
    }
}

/// Result of a call that ran to success or abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// `None` on abort and for void methods.
    pub return_value: Option<Value>,
    pub credits_used: u64,
    pub usage: StorageUsage,
    pub fee: u64,
    pub error: Option<ErrorRecord>,
    pub profile: CreditProfile,
    /// Rendered memory at the end of the call, when requested.
    pub memory_dump: Option<String>,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs `params` against `backend`.
///
/// Storage effects reach `backend` only when the call succeeds and is not
/// read-only; otherwise they are discarded. A backend fault, during the call
/// or while committing, is returned as [`EngineError::Backend`].
pub fn execute_call<B: Storage>(
    backend: &mut B,
    binary: &Binary,
    params: &CallParams,
    config: &EngineConfig,
    registry: Option<&dyn ContractRegistry>,
) -> Result<CallOutcome, EngineError> {
    check_entry(binary, &params.entry)?;

    let mut cache = CachingStorage::new(backend);
    let mut metered = if params.read_only {
        MeteredStorage::read_only(&mut cache)
    } else {
        MeteredStorage::new(&mut cache)
    };

    let mut vm = Interpreter::new(params.contract, &mut metered, params.read_only, config);
    if let Some(registry) = registry {
        vm = vm.with_registry(registry);
    }
    vm.preload(binary);
    let result = vm
        .begin(&params.entry, params.args.clone(), params.credits)
        .and_then(|_| vm.run());

    let error = match result {
        Ok(()) => None,
        Err(VMError::Storage(fault)) if fault.is_fatal() => {
            crate::error!("{} hit a backend fault: {}", params.contract, fault);
            return Err(EngineError::Backend(fault));
        }
        Err(err) => {
            let record = vm.error_record(&err);
            warn!(
                "{} aborted with code {} at offset {}: {}",
                params.contract,
                record.code.as_u16(),
                record.offset,
                record.message
            );
            Some(record)
        }
    };
    let return_value = vm.return_value();
    let credits_used = vm.credits_used();
    let profile = vm.profile().clone();
    let memory_dump = params.dump_memory.then(|| vm.dump_memory());
    drop(vm);

    let usage = metered.usage();
    drop(metered);

    if error.is_none() && !params.read_only {
        cache.commit().map_err(EngineError::Backend)?;
    } else {
        cache.discard();
    }

    if error.is_none() {
        info!(
            "{} completed using {} of {} credits",
            params.contract, credits_used, params.credits
        );
    }

    Ok(CallOutcome {
        return_value,
        credits_used,
        fee: config.fees.fee(credits_used, &usage),
        usage,
        error,
        profile,
        memory_dump,
    })
}

fn check_entry(binary: &Binary, entry: &EntryPoint) -> Result<(), EngineError> {
    let known = match entry {
        EntryPoint::Method(name) => binary.method_by_name(name).is_some(),
        EntryPoint::Index(index) => *index < binary.methods.len(),
        EntryPoint::Offset { offset, .. } => *offset < binary.code.len(),
    };
    if known {
        Ok(())
    } else {
        Err(EngineError::InvalidEntry(match entry {
            EntryPoint::Method(name) => name.clone(),
            EntryPoint::Index(index) => format!("#{index}"),
            EntryPoint::Offset { offset, .. } => format!("@{offset}"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_storage::InMemoryStorage;
    use crate::storage::test_support::{FailingWrites, FaultyStorage, contract, other_contract};
    use crate::types::address::CellRef;
    use crate::virtual_machine::errors::ErrorCode;
    use crate::virtual_machine::isa::Instruction;
    use crate::virtual_machine::operand::Operand;
    use crate::virtual_machine::program::BinaryBuilder;
    use std::collections::HashMap;

    const BUDGET: u64 = 100_000;

    /// `store`: writes 7 to slot 0 and returns 1.
    /// `broken`: writes 7 to slot 0, then divides by zero.
    /// `peek`: returns slot 0.
    fn sample() -> Binary {
        let mut b = BinaryBuilder::new();
        b.method("store", 1, 0, true);
        b.emit(Instruction::Copy, &[Operand::persistent(0), Operand::Imm(7)])
            .emit(Instruction::Copy, &[Operand::stack(0), Operand::Imm(1)])
            .emit(Instruction::Ret, &[]);
        b.method("broken", 1, 0, true);
        b.emit(Instruction::Copy, &[Operand::persistent(0), Operand::Imm(7)])
            .emit(
                Instruction::Div,
                &[Operand::stack(0), Operand::Imm(1), Operand::Imm(0)],
            )
            .emit(Instruction::Ret, &[]);
        b.method("peek", 1, 0, true);
        b.emit(Instruction::Copy, &[Operand::stack(0), Operand::persistent(0)])
            .emit(Instruction::Ret, &[]);
        b.build()
    }

    fn call(
        storage: &mut InMemoryStorage,
        params: &CallParams,
    ) -> Result<CallOutcome, EngineError> {
        execute_call(storage, &sample(), params, &EngineConfig::default(), None)
    }

    #[test]
    fn success_commits_and_prices_usage() {
        let mut storage = InMemoryStorage::new();
        let outcome = call(&mut storage, &CallParams::new(contract(), "store", BUDGET)).unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.return_value, Some(Value::int(1)));
        assert_eq!(outcome.credits_used, 2 + 33 + 2 + 5);
        assert_eq!(
            outcome.usage,
            StorageUsage {
                reads: 1,
                writes: 1,
                bytes_read: 0,
                bytes_written: 33
            }
        );
        assert_eq!(
            outcome.fee,
            EngineConfig::default().fees.fee(outcome.credits_used, &outcome.usage)
        );
        assert_eq!(outcome.profile.total(), outcome.credits_used);
        assert_eq!(
            storage.get(&contract(), CellRef::root(0)),
            Some(&Value::int(7))
        );
    }

    #[test]
    fn abort_discards_writes() {
        let mut storage = InMemoryStorage::new();
        let outcome = call(&mut storage, &CallParams::new(contract(), "broken", BUDGET)).unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.return_value, None);
        let record = outcome.error.unwrap();
        assert_eq!(record.code, ErrorCode::DivisionByZero);
        assert_eq!(record.offset, 4);
        assert_eq!(outcome.usage.writes, 1);
        assert!(outcome.credits_used > 0);
        assert_eq!(storage.cell_count(&contract()), 0);
    }

    #[test]
    fn out_of_credits_is_an_abort() {
        let mut storage = InMemoryStorage::new();
        let outcome = call(&mut storage, &CallParams::new(contract(), "store", 10)).unwrap();

        assert_eq!(outcome.error.unwrap().code, ErrorCode::OutOfCredits);
        assert!(outcome.credits_used <= 10);
        assert_eq!(storage.cell_count(&contract()), 0);
    }

    #[test]
    fn read_only_call_reads_but_never_writes() {
        let mut storage = InMemoryStorage::new();
        storage.write(&contract(), 0, Value::int(5)).unwrap();

        let peek = CallParams::new(contract(), "peek", BUDGET).read_only();
        let outcome = call(&mut storage, &peek).unwrap();
        assert_eq!(outcome.return_value, Some(Value::int(5)));
        assert_eq!(outcome.usage.reads, 1);

        let store = CallParams::new(contract(), "store", BUDGET).read_only();
        let outcome = call(&mut storage, &store).unwrap();
        assert_eq!(outcome.error.unwrap().code, ErrorCode::ReadOnlyViolation);
        assert_eq!(outcome.usage.writes, 0);
        assert_eq!(
            storage.get(&contract(), CellRef::root(0)),
            Some(&Value::int(5))
        );
    }

    #[test]
    fn unknown_entry_is_rejected_up_front() {
        let mut storage = InMemoryStorage::new();
        let err = call(&mut storage, &CallParams::new(contract(), "missing", BUDGET)).unwrap_err();
        assert_eq!(err, EngineError::InvalidEntry("missing".into()));

        let params = CallParams::new(contract(), EntryPoint::Index(9), BUDGET);
        assert_eq!(
            call(&mut storage, &params).unwrap_err(),
            EngineError::InvalidEntry("#9".into())
        );
    }

    #[test]
    fn arity_mismatch_is_an_abort() {
        let mut storage = InMemoryStorage::new();
        let params = CallParams::new(contract(), "store", BUDGET).with_args(vec![Value::Nil]);
        let outcome = call(&mut storage, &params).unwrap();
        assert_eq!(outcome.error.unwrap().code, ErrorCode::ArityMismatch);
        assert_eq!(outcome.credits_used, 0);
    }

    #[test]
    fn backend_fault_is_an_engine_error() {
        let mut storage = FaultyStorage;
        let err = execute_call(
            &mut storage,
            &sample(),
            &CallParams::new(contract(), "peek", BUDGET),
            &EngineConfig::default(),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::Backend(StorageError::Backend("disk unavailable".into()))
        );
    }

    #[test]
    fn commit_fault_is_an_engine_error() {
        let mut storage = FailingWrites;
        let err = execute_call(
            &mut storage,
            &sample(),
            &CallParams::new(contract(), "store", BUDGET),
            &EngineConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
    }

    #[test]
    fn cross_contract_effects_commit_together() {
        let mut callee = BinaryBuilder::new();
        callee.method("set", 2, 1, false);
        callee
            .emit(Instruction::Copy, &[Operand::persistent(3), Operand::stack(1)])
            .emit(Instruction::Ret, &[]);
        let registry = HashMap::from([(other_contract(), callee.build())]);

        let mut caller = BinaryBuilder::new();
        let target = caller.constant(Value::Bytes(other_contract().as_slice().to_vec()));
        caller.method("main", 2, 0, false);
        caller
            .emit(Instruction::Copy, &[Operand::persistent(1), Operand::Imm(1)])
            .emit(Instruction::Copy, &[Operand::stack(0), Operand::constant(target)])
            .emit(Instruction::Copy, &[Operand::stack(1), Operand::Imm(9)])
            .emit(
                Instruction::XCall,
                &[Operand::stack(0), Operand::Imm(0), Operand::Imm(1)],
            )
            .emit(Instruction::Ret, &[]);

        let mut storage = InMemoryStorage::new();
        let outcome = execute_call(
            &mut storage,
            &caller.build(),
            &CallParams::new(contract(), "main", BUDGET),
            &EngineConfig::default(),
            Some(&registry),
        )
        .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.return_value, None);
        assert_eq!(outcome.usage.writes, 2);
        assert_eq!(
            storage.get(&contract(), CellRef::root(1)),
            Some(&Value::int(1))
        );
        assert_eq!(
            storage.get(&other_contract(), CellRef::root(3)),
            Some(&Value::int(9))
        );
    }

    #[test]
    fn memory_dump_only_on_request() {
        let mut storage = InMemoryStorage::new();
        let params = CallParams::new(contract(), "store", BUDGET);
        assert_eq!(call(&mut storage, &params).unwrap().memory_dump, None);

        let dump = call(&mut storage, &params.with_memory_dump())
            .unwrap()
            .memory_dump
            .unwrap();
        assert!(dump.contains("s[0] = 1"));
    }

    #[test]
    fn identical_calls_on_identical_state_agree() {
        let mut first = InMemoryStorage::new();
        first.write(&contract(), 0, Value::from("seed")).unwrap();
        let mut second = first.clone();

        let params = CallParams::new(contract(), "store", BUDGET);
        let a = call(&mut first, &params).unwrap();
        let b = call(&mut second, &params).unwrap();
        assert_eq!(a, b);
        assert_eq!(first.cells(&contract()), second.cells(&contract()));
    }
}

//! Core interpreter implementation.
//!
//! The interpreter executes a [`Binary`] instruction by instruction against a
//! bound contract and [`Storage`] view. Each instruction is charged its base
//! cost before it runs; storage traffic is additionally charged per
//! serialized byte. All arithmetic is wrapping 256-bit.
//!
//! Lifecycle: [`Interpreter::new`] → [`preload`](Interpreter::preload) →
//! [`begin`](Interpreter::begin) → [`run`](Interpreter::run).

pub mod context;
pub mod credits;
pub mod memory;

use crate::core::config::EngineConfig;
use crate::debug;
use crate::storage::storage_trait::Storage;
use crate::types::address::{CellRef, ContractAddress};
use crate::types::encoding::Encode;
use crate::types::value::Value;
use crate::virtual_machine::errors::{ErrorRecord, VMError};
use crate::virtual_machine::isa::{BYTE_COST, CALL_ARG_COST, Instruction, MAX_CALL_DEPTH, STACK_SIZE};
use crate::virtual_machine::operand::Operand;
use crate::virtual_machine::program::Binary;
use context::{CallFrame, ContractRegistry, EntryPoint};
use credits::{CreditCategory, CreditMeter, CreditProfile};
use memory::{Memory, Region, STACK_BASE};
use primitive_types::U256;

macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident : $kind:ident ),* $(,)? ) ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => {
                    let instr_name = $instr.mnemonic();
                    $( let $field = exec_vm!(@read $vm, instr_name, $kind)?; )*
                    $vm.$handler(instr_name, $( $field ),*)
                }
            ),*
        }
    }};

    // Written memory address
    (@read $vm:ident, $name:ident, Dst) => {{ $vm.next_dst($name) }};
    // Value from memory, or integer immediate
    (@read $vm:ident, $name:ident, Src) => {{ $vm.next_src($name) }};
    // Raw immediate
    (@read $vm:ident, $name:ident, Imm) => {{ $vm.next_imm($name) }};
    // Persistent root slot
    (@read $vm:ident, $name:ident, Slot) => {{ $vm.next_slot($name) }};
    // Integer entry key
    (@read $vm:ident, $name:ident, Key) => {{ $vm.next_key($name) }};
    // Entry key, or none for the root
    (@read $vm:ident, $name:ident, OptKey) => {{ $vm.next_opt_key($name) }};
}

/// Interpreter lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecState {
    /// Constructed, no binary yet.
    Idle,
    /// Constants preloaded.
    Loaded,
    Running,
    /// Returned from the outermost frame.
    Finished,
    Aborted,
}

/// Bytecode interpreter bound to one contract and storage view.
pub struct Interpreter<'a, S: Storage> {
    contract: ContractAddress,
    storage: &'a mut S,
    /// Rejects every storage mutation when set.
    constant_only: bool,
    config: EngineConfig,
    registry: Option<&'a dyn ContractRegistry>,
    binary: Option<&'a Binary>,
    memory: Memory,
    frames: Vec<CallFrame>,
    credits: CreditMeter,
    /// Next instruction to execute.
    ip: usize,
    /// Index of the instruction being executed.
    instr_offset: usize,
    operands: [Operand; 3],
    operand_cursor: usize,
    state: ExecState,
    /// Whether the entry point produces a return value.
    returns: bool,
    /// Call depth of the caller for nested cross-contract interpreters.
    depth_offset: usize,
}

impl<'a, S: Storage> Interpreter<'a, S> {
    pub fn new(
        contract: ContractAddress,
        storage: &'a mut S,
        constant_only: bool,
        config: &EngineConfig,
    ) -> Self {
        Self {
            contract,
            storage,
            constant_only,
            config: config.clone(),
            registry: None,
            binary: None,
            memory: Memory::new(STACK_SIZE),
            frames: Vec::new(),
            credits: CreditMeter::new(0),
            ip: 0,
            instr_offset: 0,
            operands: [Operand::None; 3],
            operand_cursor: 0,
            state: ExecState::Idle,
            returns: false,
            depth_offset: 0,
        }
    }

    /// Enables cross-contract calls resolved through `registry`.
    pub fn with_registry(mut self, registry: &'a dyn ContractRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Populates the constant region from the binary's constant pool.
    pub fn preload(&mut self, binary: &'a Binary) {
        self.memory.load_constants(&binary.constants);
        self.binary = Some(binary);
        self.state = ExecState::Loaded;
    }

    /// Sets up the outermost frame for `entry` with `args` and a fresh
    /// credit budget.
    pub fn begin(&mut self, entry: &EntryPoint, args: Vec<Value>, credits: u64) -> Result<(), VMError> {
        let binary = self.binary.ok_or(VMError::NotRunning)?;
        let (name, offset, frame_size, arity, returns) = match entry {
            EntryPoint::Method(name) => {
                let (_, m) = binary
                    .method_by_name(name)
                    .ok_or_else(|| VMError::UndefinedMethod {
                        method: name.clone(),
                    })?;
                (m.name.clone(), m.entry, m.effective_frame_size(), m.arity as usize, m.returns)
            }
            EntryPoint::Index(index) => {
                let m = binary
                    .methods
                    .get(*index)
                    .ok_or_else(|| VMError::UndefinedMethod {
                        method: format!("#{index}"),
                    })?;
                (m.name.clone(), m.entry, m.effective_frame_size(), m.arity as usize, m.returns)
            }
            EntryPoint::Offset { offset, frame_size } => (
                format!("@{offset}"),
                *offset,
                (*frame_size as usize).max(args.len() + 1),
                args.len(),
                true,
            ),
        };
        if args.len() != arity {
            return Err(VMError::ArityMismatch {
                method: name,
                expected: arity as u64,
                actual: args.len() as u64,
            });
        }

        self.credits = CreditMeter::new(credits);
        self.frames.clear();
        self.memory.push_frame(0, frame_size)?;
        for (i, arg) in args.into_iter().enumerate() {
            self.memory.set_slot(1 + i, arg, STACK_BASE + 1 + i as u64)?;
        }
        self.frames.push(CallFrame {
            base: 0,
            size: frame_size,
            return_addr: 0,
            return_slot: None,
        });
        self.ip = offset;
        self.instr_offset = offset;
        self.returns = returns;
        self.state = ExecState::Running;
        Ok(())
    }

    /// Executes until the outermost frame returns or an abort.
    ///
    /// No error is swallowed: the first failure stops dispatch and is
    /// returned as is.
    pub fn run(&mut self) -> Result<(), VMError> {
        if self.state != ExecState::Running {
            return Err(VMError::NotRunning);
        }
        while self.state == ExecState::Running {
            if let Err(err) = self.step() {
                self.state = ExecState::Aborted;
                debug!(
                    "{} aborted at {}: {}",
                    self.contract, self.instr_offset, err
                );
                return Err(err);
            }
        }
        debug!(
            "{} finished using {} credits",
            self.contract,
            self.credits.used()
        );
        Ok(())
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn contract(&self) -> &ContractAddress {
        &self.contract
    }

    pub fn credits_used(&self) -> u64 {
        self.credits.used()
    }

    pub fn credits_remaining(&self) -> u64 {
        self.credits.remaining()
    }

    pub fn profile(&self) -> &CreditProfile {
        self.credits.profile()
    }

    /// Slot `index` of the active frame; after success, the outermost frame.
    pub fn stack_value(&self, index: usize) -> Option<&Value> {
        let frame = self.frames.last()?;
        if index >= frame.size {
            return None;
        }
        self.memory.slot(frame.base + index, 0).ok()
    }

    /// Return value of a finished execution; `None` for void entry points.
    pub fn return_value(&self) -> Option<Value> {
        if self.state != ExecState::Finished || !self.returns {
            return None;
        }
        self.stack_value(0).cloned()
    }

    /// Builds the caller-facing record for `err` at the current instruction.
    pub fn error_record(&self, err: &VMError) -> ErrorRecord {
        let line = self.binary.map(|b| b.line_of(self.instr_offset)).unwrap_or(0);
        ErrorRecord::new(
            err,
            self.instr_offset,
            line,
            self.config.max_error_message_len,
        )
    }

    /// Renders constants, stack and frames for debugging only.
    pub fn dump_memory(&self) -> String {
        let mut out = self.memory.dump();
        out.push_str(&format!("frames ({}):\n", self.frames.len()));
        for (i, frame) in self.frames.iter().enumerate() {
            out.push_str(&format!(
                "  #{i} base={} size={} return_addr={}\n",
                frame.base, frame.size, frame.return_addr
            ));
        }
        out.push_str(&format!(
            "ip={} state={:?} credits={}/{}\n",
            self.ip,
            self.state,
            self.credits.used(),
            self.credits.budget()
        ));
        out
    }

    fn depth(&self) -> usize {
        self.depth_offset + self.frames.len()
    }

    fn binary(&self) -> Result<&'a Binary, VMError> {
        self.binary.ok_or(VMError::NotRunning)
    }

    /// Fetches, charges and executes one instruction.
    fn step(&mut self) -> Result<(), VMError> {
        let binary = self.binary()?;
        let instr = *binary.code.get(self.ip).ok_or(VMError::InvalidJump {
            target: self.ip as u64,
            len: binary.code.len(),
        })?;
        self.instr_offset = self.ip;
        self.ip += 1;

        let instruction = Instruction::try_from(instr.opcode)?;
        self.credits
            .charge(instruction.base_cost(), CreditCategory::Opcode)?;
        if instruction.mutates_storage() {
            self.guard(instruction.mnemonic())?;
        }

        self.operands = instr.operands;
        self.operand_cursor = 0;
        self.exec(instruction)
    }

    /// Executes a single instruction.
    fn exec(&mut self, instruction: Instruction) -> Result<(), VMError> {
        exec_vm! {
            vm = self,
            instr = instruction,
            {
                // Data movement
                Nop => op_nop(),
                Copy => op_copy(dst: Dst, src: Src),
                // Integer arithmetic
                Add => op_add(dst: Dst, a: Src, b: Src),
                Sub => op_sub(dst: Dst, a: Src, b: Src),
                Mul => op_mul(dst: Dst, a: Src, b: Src),
                Div => op_div(dst: Dst, a: Src, b: Src),
                Mod => op_mod(dst: Dst, a: Src, b: Src),
                And => op_and(dst: Dst, a: Src, b: Src),
                Or => op_or(dst: Dst, a: Src, b: Src),
                Xor => op_xor(dst: Dst, a: Src, b: Src),
                Not => op_not(dst: Dst, a: Src),
                // Comparison
                Eq => op_eq(dst: Dst, a: Src, b: Src),
                Lt => op_lt(dst: Dst, a: Src, b: Src),
                Gt => op_gt(dst: Dst, a: Src, b: Src),
                Le => op_le(dst: Dst, a: Src, b: Src),
                Ge => op_ge(dst: Dst, a: Src, b: Src),
                // Strings and blobs
                Concat => op_concat(dst: Dst, a: Src, b: Src),
                Len => op_len(dst: Dst, a: Src),
                // Control flow
                Jmp => op_jmp(target: Imm),
                Jz => op_jz(cond: Src, target: Imm),
                Jnz => op_jnz(cond: Src, target: Imm),
                Call => op_call(base: Dst, method: Imm, argc: Imm),
                XCall => op_xcall(base: Dst, method: Imm, argc: Imm),
                Ret => op_ret(),
                // Persistent storage
                SLoad => op_sload(dst: Dst, root: Slot, key: Key),
                SStore => op_sstore(root: Slot, key: Key, src: Src),
                SDel => op_sdel(root: Slot, key: Key),
                SErase => op_serase(root: Slot),
                NewMap => op_newmap(root: Slot),
                NewArr => op_newarr(root: Slot),
                Append => op_append(root: Slot, src: Src),
                Deref => op_deref(dst: Dst, reference: Src),
                StoreRef => op_storeref(reference: Src, src: Src),
                Find => op_find(dst: Dst, src: Src),
                Exists => op_exists(dst: Dst, root: Slot, key: OptKey),
            }
        }
    }

    // ---------- operand decoding ----------

    fn next_operand(&mut self) -> (usize, Operand) {
        let index = self.operand_cursor;
        self.operand_cursor += 1;
        (index, self.operands.get(index).copied().unwrap_or_default())
    }

    fn next_dst(&mut self, instr: &'static str) -> Result<u64, VMError> {
        match self.next_operand() {
            (_, Operand::Addr(address)) => Ok(address),
            (index, _) => Err(VMError::InvalidOperand {
                instruction: instr,
                index,
                expected: "an address",
            }),
        }
    }

    fn next_src(&mut self, instr: &'static str) -> Result<Value, VMError> {
        match self.next_operand() {
            (_, Operand::Addr(address)) => self.read_mem(address),
            (_, Operand::Imm(v)) => Ok(Value::int(v)),
            (index, Operand::None) => Err(VMError::InvalidOperand {
                instruction: instr,
                index,
                expected: "an address or immediate",
            }),
        }
    }

    fn next_imm(&mut self, instr: &'static str) -> Result<u64, VMError> {
        match self.next_operand() {
            (_, Operand::Imm(v)) => Ok(v),
            (index, _) => Err(VMError::InvalidOperand {
                instruction: instr,
                index,
                expected: "an immediate",
            }),
        }
    }

    fn next_slot(&mut self, instr: &'static str) -> Result<u64, VMError> {
        match self.next_operand() {
            (index, Operand::Addr(address)) => match Region::resolve(address)? {
                Region::Persistent(slot) => Ok(slot),
                _ => Err(VMError::InvalidOperand {
                    instruction: instr,
                    index,
                    expected: "a persistent address",
                }),
            },
            (index, _) => Err(VMError::InvalidOperand {
                instruction: instr,
                index,
                expected: "a persistent address",
            }),
        }
    }

    fn next_key(&mut self, instr: &'static str) -> Result<u64, VMError> {
        let value = self.next_src(instr)?;
        key_of(instr, &value)
    }

    fn next_opt_key(&mut self, instr: &'static str) -> Result<Option<u64>, VMError> {
        if self.operands.get(self.operand_cursor) == Some(&Operand::None) {
            self.operand_cursor += 1;
            return Ok(None);
        }
        self.next_key(instr).map(Some)
    }

    // ---------- memory ----------

    fn stack_index(&self, n: usize, address: u64) -> Result<usize, VMError> {
        let frame = self.frames.last().ok_or(VMError::NotRunning)?;
        if n >= frame.size {
            return Err(VMError::AddressOutOfRange { address });
        }
        Ok(frame.base + n)
    }

    fn read_mem(&mut self, address: u64) -> Result<Value, VMError> {
        match Region::resolve(address)? {
            Region::Constant(index) => Ok(self.memory.constant(index, address)?.clone()),
            Region::Stack(n) => {
                let index = self.stack_index(n, address)?;
                Ok(self.memory.slot(index, address)?.clone())
            }
            Region::Persistent(slot) => Ok(self
                .storage_read(CellRef::root(slot))?
                .unwrap_or(Value::Nil)),
        }
    }

    fn write_mem(&mut self, instr: &'static str, address: u64, value: Value) -> Result<(), VMError> {
        match Region::resolve(address)? {
            Region::Constant(_) => Err(VMError::ConstantWrite { address }),
            Region::Stack(n) => {
                let index = self.stack_index(n, address)?;
                self.memory.set_slot(index, value, address)
            }
            Region::Persistent(slot) => {
                self.guard(instr)?;
                self.store_root(instr, slot, value)
            }
        }
    }

    /// Absolute index of stack slot `base`, checking that `base..=base+argc`
    /// lies inside the active frame.
    fn call_slots(&self, instr: &'static str, base: u64, argc: u64) -> Result<usize, VMError> {
        let n = match Region::resolve(base)? {
            Region::Stack(n) => n,
            _ => {
                return Err(VMError::InvalidOperand {
                    instruction: instr,
                    index: 0,
                    expected: "a stack address",
                });
            }
        };
        let last = base.saturating_add(argc);
        let last_n = usize::try_from(argc)
            .ok()
            .and_then(|argc| n.checked_add(argc))
            .ok_or(VMError::AddressOutOfRange { address: last })?;
        self.stack_index(last_n, last)?;
        self.stack_index(n, base)
    }

    fn call_args(&self, first: usize, argc: u64) -> Result<Vec<Value>, VMError> {
        (1..=argc as usize)
            .map(|i| self.memory.slot(first + i, STACK_BASE).cloned())
            .collect()
    }

    // ---------- storage ----------

    fn guard(&self, instr: &'static str) -> Result<(), VMError> {
        if self.constant_only {
            return Err(VMError::ReadOnlyViolation { instruction: instr });
        }
        Ok(())
    }

    fn charge_bytes(&mut self, value: &Value, category: CreditCategory) -> Result<(), VMError> {
        let cost = BYTE_COST.saturating_mul(value.encoded_len() as u64);
        self.credits.charge(cost, category)
    }

    /// Reads a cell, then charges for the bytes returned.
    fn storage_read(&mut self, cell: CellRef) -> Result<Option<Value>, VMError> {
        let value = self.storage.read_cell(&self.contract, cell)?;
        if let Some(v) = &value {
            self.charge_bytes(v, CreditCategory::StorageRead)?;
        }
        Ok(value)
    }

    /// Charges for the bytes to be written, then writes the cell.
    fn storage_write(&mut self, cell: CellRef, value: Value) -> Result<(), VMError> {
        self.charge_bytes(&value, CreditCategory::StorageWrite)?;
        self.storage.write_cell(&self.contract, cell, value)?;
        Ok(())
    }

    /// Writes a plain value to the root of `slot`. Container roots are only
    /// created by `NEWMAP`/`NEWARR` and only removed by `SERASE`.
    fn store_root(&mut self, instr: &'static str, slot: u64, value: Value) -> Result<(), VMError> {
        if value.is_container() {
            return Err(type_mismatch(instr, "non-container value", &value));
        }
        let cell = CellRef::root(slot);
        if let Some(existing) = self.storage_read(cell)? {
            if existing.is_container() {
                return Err(type_mismatch(instr, "non-container root", &existing));
            }
        }
        self.storage_write(cell, value)
    }

    /// Writes entry `key` under the container rooted at `slot`, keeping the
    /// root's count in step. Arrays only grow at their end.
    fn store_entry(&mut self, instr: &'static str, slot: u64, key: u64, src: Value) -> Result<(), VMError> {
        let cell = CellRef::keyed(slot, key);
        match self.container(instr, slot)? {
            Value::Map(count) => {
                let existed = self.storage_read(cell)?.is_some();
                self.storage_write(cell, src)?;
                if !existed {
                    self.storage_write(CellRef::root(slot), Value::Map(count.saturating_add(1)))?;
                }
            }
            Value::Array(len) => {
                if key > len {
                    return Err(VMError::IndexOutOfBounds { index: key, len });
                }
                self.storage_write(cell, src)?;
                if key == len {
                    self.storage_write(CellRef::root(slot), Value::Array(len.saturating_add(1)))?;
                }
            }
            other => return Err(type_mismatch(instr, "Array or Map", &other)),
        }
        Ok(())
    }

    /// Reads the root of `slot`, which must be an `Array` or `Map`.
    fn container(&mut self, instr: &'static str, slot: u64) -> Result<Value, VMError> {
        match self.storage_read(CellRef::root(slot))? {
            Some(root) if root.is_container() => Ok(root),
            Some(other) => Err(type_mismatch(instr, "Array or Map", &other)),
            None => Err(VMError::TypeMismatch {
                instruction: instr,
                expected: "Array or Map",
                actual: "absent",
            }),
        }
    }

    // ---------- handlers ----------

    fn op_nop(&mut self, _instr: &'static str) -> Result<(), VMError> {
        Ok(())
    }

    fn op_copy(&mut self, instr: &'static str, dst: u64, src: Value) -> Result<(), VMError> {
        self.write_mem(instr, dst, src)
    }

    fn op_add(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, Value::Int(a.overflowing_add(b).0))
    }

    fn op_sub(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, Value::Int(a.overflowing_sub(b).0))
    }

    fn op_mul(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, Value::Int(a.overflowing_mul(b).0))
    }

    fn op_div(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        if b.is_zero() {
            return Err(VMError::DivisionByZero);
        }
        self.write_mem(instr, dst, Value::Int(a / b))
    }

    fn op_mod(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        if b.is_zero() {
            return Err(VMError::DivisionByZero);
        }
        self.write_mem(instr, dst, Value::Int(a % b))
    }

    fn op_and(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, Value::Int(a & b))
    }

    fn op_or(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, Value::Int(a | b))
    }

    fn op_xor(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, Value::Int(a ^ b))
    }

    fn op_not(&mut self, instr: &'static str, dst: u64, a: Value) -> Result<(), VMError> {
        let a = int(instr, &a)?;
        self.write_mem(instr, dst, Value::Int(!a))
    }

    fn op_eq(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        self.write_mem(instr, dst, flag(a == b))
    }

    fn op_lt(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, flag(a < b))
    }

    fn op_gt(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, flag(a > b))
    }

    fn op_le(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, flag(a <= b))
    }

    fn op_ge(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let (a, b) = (int(instr, &a)?, int(instr, &b)?);
        self.write_mem(instr, dst, flag(a >= b))
    }

    fn op_concat(&mut self, instr: &'static str, dst: u64, a: Value, b: Value) -> Result<(), VMError> {
        let joined = match (a, b) {
            (Value::Str(mut x), Value::Str(y)) => {
                x.push_str(&y);
                Value::Str(x)
            }
            (Value::Bytes(mut x), Value::Bytes(y)) => {
                x.extend_from_slice(&y);
                Value::Bytes(x)
            }
            (Value::Str(_), other) => return Err(type_mismatch(instr, "Str", &other)),
            (Value::Bytes(_), other) => return Err(type_mismatch(instr, "Bytes", &other)),
            (other, _) => return Err(type_mismatch(instr, "Str or Bytes", &other)),
        };
        self.write_mem(instr, dst, joined)
    }

    fn op_len(&mut self, instr: &'static str, dst: u64, a: Value) -> Result<(), VMError> {
        let len = match &a {
            Value::Str(s) => s.len() as u64,
            Value::Bytes(b) => b.len() as u64,
            Value::Array(n) | Value::Map(n) => *n,
            other => return Err(type_mismatch(instr, "Str, Bytes, Array or Map", other)),
        };
        self.write_mem(instr, dst, Value::int(len))
    }

    fn jump(&mut self, target: u64) -> Result<(), VMError> {
        let len = self.binary()?.code.len();
        if target >= len as u64 {
            return Err(VMError::InvalidJump { target, len });
        }
        self.ip = target as usize;
        Ok(())
    }

    fn op_jmp(&mut self, _instr: &'static str, target: u64) -> Result<(), VMError> {
        self.jump(target)
    }

    fn op_jz(&mut self, _instr: &'static str, cond: Value, target: u64) -> Result<(), VMError> {
        if !cond.truthy() {
            self.jump(target)?;
        }
        Ok(())
    }

    fn op_jnz(&mut self, _instr: &'static str, cond: Value, target: u64) -> Result<(), VMError> {
        if cond.truthy() {
            self.jump(target)?;
        }
        Ok(())
    }

    fn check_depth(&self) -> Result<(), VMError> {
        if self.depth() >= MAX_CALL_DEPTH {
            return Err(VMError::CallDepthExceeded {
                limit: MAX_CALL_DEPTH,
            });
        }
        Ok(())
    }

    fn op_call(&mut self, instr: &'static str, base: u64, method: u64, argc: u64) -> Result<(), VMError> {
        let binary = self.binary()?;
        let m = usize::try_from(method)
            .ok()
            .and_then(|i| binary.methods.get(i))
            .ok_or_else(|| VMError::UndefinedMethod {
                method: format!("#{method}"),
            })?;
        if argc != m.arity as u64 {
            return Err(VMError::ArityMismatch {
                method: m.name.clone(),
                expected: m.arity as u64,
                actual: argc,
            });
        }
        self.credits
            .charge(CALL_ARG_COST.saturating_mul(argc), CreditCategory::CallOverhead)?;
        self.check_depth()?;

        let first = self.call_slots(instr, base, argc)?;
        let args = self.call_args(first, argc)?;
        let caller = self.frames.last().ok_or(VMError::NotRunning)?;
        let frame_base = caller.base + caller.size;
        let size = m.effective_frame_size();
        self.memory.push_frame(frame_base, size)?;
        for (i, arg) in args.into_iter().enumerate() {
            self.memory
                .set_slot(frame_base + 1 + i, arg, STACK_BASE + 1 + i as u64)?;
        }
        self.frames.push(CallFrame {
            base: frame_base,
            size,
            return_addr: self.ip,
            return_slot: Some(first),
        });
        self.ip = m.entry;
        Ok(())
    }

    /// Runs a method of another contract in a nested interpreter over the
    /// same storage view, with this execution's remaining credits.
    fn op_xcall(&mut self, instr: &'static str, base: u64, method: u64, argc: u64) -> Result<(), VMError> {
        let first = self.call_slots(instr, base, argc)?;
        let callee = match self.memory.slot(first, base)? {
            Value::Bytes(bytes) => {
                ContractAddress::from_slice(bytes).ok_or(VMError::TypeMismatch {
                    instruction: instr,
                    expected: "32-byte contract address",
                    actual: "Bytes",
                })?
            }
            other => return Err(type_mismatch(instr, "Bytes", other)),
        };
        self.credits
            .charge(CALL_ARG_COST.saturating_mul(argc), CreditCategory::CallOverhead)?;
        self.check_depth()?;

        let binary = self
            .registry
            .and_then(|r| r.binary(&callee))
            .ok_or(VMError::UnknownContract(callee))?;
        let args = self.call_args(first, argc)?;
        let index = usize::try_from(method).map_err(|_| VMError::UndefinedMethod {
            method: format!("#{method}"),
        })?;

        let mut nested = Interpreter::new(callee, &mut *self.storage, self.constant_only, &self.config);
        nested.registry = self.registry;
        nested.depth_offset = self.depth_offset + self.frames.len();
        nested.preload(binary);
        let result = nested
            .begin(&EntryPoint::Index(index), args, self.credits.remaining())
            .and_then(|_| nested.run());
        self.credits.absorb(nested.credits.used(), nested.credits.profile());
        result?;
        let ret = nested.return_value().unwrap_or(Value::Nil);
        self.memory.set_slot(first, ret, base)
    }

    fn op_ret(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let frame = self.frames.pop().ok_or(VMError::NotRunning)?;
        match frame.return_slot {
            None => {
                self.frames.push(frame);
                self.state = ExecState::Finished;
                Ok(())
            }
            Some(dst) => {
                let value = self.memory.slot(frame.base, STACK_BASE)?.clone();
                self.memory.pop_to(frame.base);
                self.memory.set_slot(dst, value, STACK_BASE)?;
                self.ip = frame.return_addr;
                Ok(())
            }
        }
    }

    fn op_sload(&mut self, instr: &'static str, dst: u64, slot: u64, key: u64) -> Result<(), VMError> {
        if let Value::Array(len) = self.container(instr, slot)? {
            if key >= len {
                return Err(VMError::IndexOutOfBounds { index: key, len });
            }
        }
        let value = self
            .storage_read(CellRef::keyed(slot, key))?
            .unwrap_or(Value::Nil);
        self.write_mem(instr, dst, value)
    }

    fn op_sstore(&mut self, instr: &'static str, slot: u64, key: u64, src: Value) -> Result<(), VMError> {
        self.store_entry(instr, slot, key, src)
    }

    fn op_sdel(&mut self, instr: &'static str, slot: u64, key: u64) -> Result<(), VMError> {
        match self.container(instr, slot)? {
            Value::Map(count) => {
                if self.storage_read(CellRef::keyed(slot, key))?.is_some() {
                    self.storage.erase_key(&self.contract, slot, key)?;
                    self.storage_write(CellRef::root(slot), Value::Map(count.saturating_sub(1)))?;
                }
            }
            // Arrays stay dense: only the last element can be removed.
            Value::Array(len) => {
                if len == 0 || key != len - 1 {
                    return Err(VMError::IndexOutOfBounds { index: key, len });
                }
                self.storage.erase_key(&self.contract, slot, key)?;
                self.storage_write(CellRef::root(slot), Value::Array(key))?;
            }
            other => return Err(type_mismatch(instr, "Array or Map", &other)),
        }
        Ok(())
    }

    fn op_serase(&mut self, _instr: &'static str, slot: u64) -> Result<(), VMError> {
        self.storage.erase(&self.contract, slot)?;
        Ok(())
    }

    fn op_newmap(&mut self, instr: &'static str, slot: u64) -> Result<(), VMError> {
        self.charge_bytes(&Value::Map(0), CreditCategory::StorageWrite)?;
        self.storage.add_key(&self.contract, slot)?;
        match self.storage_read(CellRef::root(slot))? {
            Some(Value::Map(_)) => Ok(()),
            Some(other) => Err(type_mismatch(instr, "Map", &other)),
            None => Err(VMError::TypeMismatch {
                instruction: instr,
                expected: "Map",
                actual: "absent",
            }),
        }
    }

    fn op_newarr(&mut self, instr: &'static str, slot: u64) -> Result<(), VMError> {
        match self.storage_read(CellRef::root(slot))? {
            None => self.storage_write(CellRef::root(slot), Value::Array(0)),
            Some(Value::Array(_)) => Ok(()),
            Some(other) => Err(type_mismatch(instr, "Array", &other)),
        }
    }

    fn op_append(&mut self, instr: &'static str, slot: u64, src: Value) -> Result<(), VMError> {
        match self.storage_read(CellRef::root(slot))? {
            Some(Value::Array(len)) => {
                self.storage_write(CellRef::keyed(slot, len), src)?;
                self.storage_write(CellRef::root(slot), Value::Array(len.saturating_add(1)))
            }
            Some(other) => Err(type_mismatch(instr, "Array", &other)),
            None => Err(VMError::TypeMismatch {
                instruction: instr,
                expected: "Array",
                actual: "absent",
            }),
        }
    }

    fn op_deref(&mut self, instr: &'static str, dst: u64, reference: Value) -> Result<(), VMError> {
        let Value::Ref(cell) = reference else {
            return Err(type_mismatch(instr, "Ref", &reference));
        };
        let value = self.storage_read(cell)?.unwrap_or(Value::Nil);
        self.write_mem(instr, dst, value)
    }

    fn op_storeref(&mut self, instr: &'static str, reference: Value, src: Value) -> Result<(), VMError> {
        let Value::Ref(cell) = reference else {
            return Err(type_mismatch(instr, "Ref", &reference));
        };
        match cell.key {
            None => self.store_root(instr, cell.slot, src),
            Some(key) => self.store_entry(instr, cell.slot, key, src),
        }
    }

    fn op_find(&mut self, instr: &'static str, dst: u64, src: Value) -> Result<(), VMError> {
        let found = self.storage.lookup(&self.contract, &src)?;
        self.charge_bytes(&src, CreditCategory::StorageRead)?;
        self.write_mem(instr, dst, found.map(Value::Ref).unwrap_or(Value::Nil))
    }

    fn op_exists(&mut self, instr: &'static str, dst: u64, slot: u64, key: Option<u64>) -> Result<(), VMError> {
        let cell = match key {
            None => CellRef::root(slot),
            Some(key) => CellRef::keyed(slot, key),
        };
        let present = self.storage_read(cell)?.is_some();
        self.write_mem(instr, dst, flag(present))
    }
}

fn type_mismatch(instr: &'static str, expected: &'static str, actual: &Value) -> VMError {
    VMError::TypeMismatch {
        instruction: instr,
        expected,
        actual: actual.type_name(),
    }
}

fn int(instr: &'static str, value: &Value) -> Result<U256, VMError> {
    value.as_int().ok_or_else(|| type_mismatch(instr, "Int", value))
}

fn key_of(instr: &'static str, value: &Value) -> Result<u64, VMError> {
    let key = int(instr, value)?;
    if key > U256::from(u64::MAX) {
        return Err(VMError::TypeMismatch {
            instruction: instr,
            expected: "64-bit key",
            actual: "Int",
        });
    }
    Ok(key.low_u64())
}

fn flag(b: bool) -> Value {
    Value::int(b as u64)
}

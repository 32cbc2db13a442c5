//! Instruction set definitions.
//!
//! [`for_each_instruction!`](crate::for_each_instruction) holds the canonical
//! instruction table and invokes a callback macro with it, so the opcode enum,
//! the dispatch loop and the ISA checksum test are generated from one list.
//!
//! Every instruction is one opcode byte plus up to three operands. Operand
//! kinds in the table describe how the interpreter reads each one:
//! - `Dst`: memory address written by the instruction
//! - `Src`: value read from a memory address, or an integer immediate
//! - `Imm`: immediate only (jump targets, method indices, argument counts)
//! - `Slot`: persistent-region address naming a storage root slot
//! - `Key`: value operand holding an integer entry key
//! - `OptKey`: like `Key`, but may be omitted to address the root itself
//!
//! The trailing number is the base credit cost charged before execution.

use crate::virtual_machine::errors::VMError;

/// Credits per serialized byte a storage operation reads or writes.
pub const BYTE_COST: u64 = 1;
/// Credits per argument passed by `CALL` or `XCALL`.
pub const CALL_ARG_COST: u64 = 2;
/// Stack slots available to one execution, across all frames.
pub const STACK_SIZE: usize = 1024;
/// Maximum nesting of local and cross-contract calls.
pub const MAX_CALL_DEPTH: usize = 64;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Data movement
            // =========================
            /// NOP ; does nothing
            Nop = 0x00, "NOP" => [], 1,
            /// COPY dst, src ; dst = src
            Copy = 0x01, "COPY" => [dst: Dst, src: Src], 2,
            // =========================
            // Integer arithmetic (wrapping, 256-bit)
            // =========================
            /// ADD dst, a, b ; dst = a + b
            Add = 0x10, "ADD" => [dst: Dst, a: Src, b: Src], 3,
            /// SUB dst, a, b ; dst = a - b
            Sub = 0x11, "SUB" => [dst: Dst, a: Src, b: Src], 3,
            /// MUL dst, a, b ; dst = a * b
            Mul = 0x12, "MUL" => [dst: Dst, a: Src, b: Src], 5,
            /// DIV dst, a, b ; dst = a / b (abort on division by zero)
            Div = 0x13, "DIV" => [dst: Dst, a: Src, b: Src], 10,
            /// MOD dst, a, b ; dst = a % b (abort on division by zero)
            Mod = 0x14, "MOD" => [dst: Dst, a: Src, b: Src], 10,
            /// AND dst, a, b ; dst = a & b
            And = 0x15, "AND" => [dst: Dst, a: Src, b: Src], 2,
            /// OR dst, a, b ; dst = a | b
            Or = 0x16, "OR" => [dst: Dst, a: Src, b: Src], 2,
            /// XOR dst, a, b ; dst = a ^ b
            Xor = 0x17, "XOR" => [dst: Dst, a: Src, b: Src], 2,
            /// NOT dst, a ; dst = !a (bitwise)
            Not = 0x18, "NOT" => [dst: Dst, a: Src], 1,
            // =========================
            // Comparison (result is Int 1 or 0)
            // =========================
            /// EQ dst, a, b ; dst = (a == b), any types
            Eq = 0x20, "EQ" => [dst: Dst, a: Src, b: Src], 3,
            /// LT dst, a, b ; dst = (a < b)
            Lt = 0x21, "LT" => [dst: Dst, a: Src, b: Src], 3,
            /// GT dst, a, b ; dst = (a > b)
            Gt = 0x22, "GT" => [dst: Dst, a: Src, b: Src], 3,
            /// LE dst, a, b ; dst = (a <= b)
            Le = 0x23, "LE" => [dst: Dst, a: Src, b: Src], 3,
            /// GE dst, a, b ; dst = (a >= b)
            Ge = 0x24, "GE" => [dst: Dst, a: Src, b: Src], 3,
            // =========================
            // Strings and blobs
            // =========================
            /// CONCAT dst, a, b ; dst = a ++ b (Str or Bytes)
            Concat = 0x28, "CONCAT" => [dst: Dst, a: Src, b: Src], 10,
            /// LEN dst, a ; byte length of Str/Bytes, element count of Array/Map
            Len = 0x29, "LEN" => [dst: Dst, a: Src], 2,
            // =========================
            // Control flow
            // =========================
            /// JMP target ; ip = target
            Jmp = 0x30, "JMP" => [target: Imm], 5,
            /// JZ cond, target ; if !cond then ip = target
            Jz = 0x31, "JZ" => [cond: Src, target: Imm], 5,
            /// JNZ cond, target ; if cond then ip = target
            Jnz = 0x32, "JNZ" => [cond: Src, target: Imm], 5,
            /// CALL base, method, argc ; args at base+1.., return value -> base
            Call = 0x33, "CALL" => [base: Dst, method: Imm, argc: Imm], 50,
            /// XCALL base, method, argc ; callee address at base, args at base+1.., return value -> base
            XCall = 0x34, "XCALL" => [base: Dst, method: Imm, argc: Imm], 200,
            /// RET ; return from the active frame, slot 0 holds the return value
            Ret = 0x35, "RET" => [], 5,
            // =========================
            // Persistent storage
            // =========================
            /// SLOAD dst, root, key ; dst = root[key]
            SLoad = 0x40, "SLOAD" => [dst: Dst, root: Slot, key: Key], 50,
            /// SSTORE root, key, src ; root[key] = src
            SStore = 0x41, "SSTORE" => [root: Slot, key: Key, src: Src], 200,
            /// SDEL root, key ; removes root[key]
            SDel = 0x42, "SDEL" => [root: Slot, key: Key], 100,
            /// SERASE root ; removes the root and every entry under it
            SErase = 0x43, "SERASE" => [root: Slot], 200,
            /// NEWMAP root ; allocates an empty map at root, or confirms one
            NewMap = 0x44, "NEWMAP" => [root: Slot], 100,
            /// NEWARR root ; allocates an empty array at root, or confirms one
            NewArr = 0x45, "NEWARR" => [root: Slot], 100,
            /// APPEND root, src ; pushes src onto the array at root
            Append = 0x46, "APPEND" => [root: Slot, src: Src], 200,
            /// DEREF dst, ref ; dst = *ref
            Deref = 0x47, "DEREF" => [dst: Dst, reference: Src], 50,
            /// STOREREF ref, src ; *ref = src
            StoreRef = 0x48, "STOREREF" => [reference: Src, src: Src], 200,
            /// FIND dst, src ; dst = reference to a cell holding src, or Nil
            Find = 0x49, "FIND" => [dst: Dst, src: Src], 100,
            /// EXISTS dst, root, key? ; dst = 1 if the cell exists
            Exists = 0x4A, "EXISTS" => [dst: Dst, root: Slot, key: OptKey], 50,
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $cost:expr
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::InvalidOpcode { opcode: value }),
                }
            }
        }

        impl Instruction {
            /// Every instruction in table order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Returns the base credit cost for this instruction.
            pub const fn base_cost(&self) -> u64 {
                match self {
                    $( Instruction::$name => $cost, )*
                }
            }

            /// Number of operands the instruction reads.
            pub const fn operand_count(&self) -> usize {
                match self {
                    $( Instruction::$name => <[&str]>::len(&[$( stringify!($field) ),*]), )*
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

impl Instruction {
    /// Instructions that always mutate persistent storage.
    ///
    /// Generic writes (`COPY`, arithmetic) reach storage only when their
    /// destination is a persistent address; those are checked at write time.
    pub const fn mutates_storage(&self) -> bool {
        matches!(
            self,
            Instruction::SStore
                | Instruction::SDel
                | Instruction::SErase
                | Instruction::NewMap
                | Instruction::NewArr
                | Instruction::Append
                | Instruction::StoreRef
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_try_from_invalid() {
        assert!(matches!(
            Instruction::try_from(0xFF),
            Err(VMError::InvalidOpcode { opcode: 0xFF })
        ));
    }

    #[test]
    fn opcodes_decode_to_themselves() {
        for instr in Instruction::ALL {
            assert_eq!(Instruction::try_from(*instr as u8).unwrap(), *instr);
        }
    }

    #[test]
    fn operand_counts() {
        assert_eq!(Instruction::Nop.operand_count(), 0);
        assert_eq!(Instruction::Jz.operand_count(), 2);
        assert_eq!(Instruction::SStore.operand_count(), 3);
        assert!(Instruction::ALL.iter().all(|i| i.operand_count() <= 3));
    }

    #[test]
    fn storage_mutators_cost_more_than_reads() {
        assert!(Instruction::SStore.base_cost() > Instruction::SLoad.base_cost());
        assert!(Instruction::SStore.mutates_storage());
        assert!(!Instruction::SLoad.mutates_storage());
    }
}

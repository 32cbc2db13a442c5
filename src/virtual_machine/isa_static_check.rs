#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    struct Entry {
        opcode: u8,
        mnemonic: &'static str,
        kinds: &'static [&'static str],
        cost: u64,
    }

    macro_rules! collect_isa {
        (
            $( $(#[$doc:meta])* $name:ident = $opcode:literal, $mnemonic:literal => [ $( $field:ident : $kind:ident ),* $(,)? ], $cost:expr ),* $(,)?
        ) => {
            vec![
                $(
                    Entry {
                        opcode: $opcode,
                        mnemonic: $mnemonic,
                        kinds: &[ $( stringify!($kind) ),* ],
                        cost: $cost,
                    },
                )*
            ]
        };
    }

    fn table() -> Vec<Entry> {
        crate::for_each_instruction!(collect_isa)
    }

    #[test]
    fn opcodes_and_mnemonics_are_unique() {
        let table = table();
        let opcodes: HashSet<u8> = table.iter().map(|e| e.opcode).collect();
        let mnemonics: HashSet<&str> = table.iter().map(|e| e.mnemonic).collect();
        assert_eq!(opcodes.len(), table.len());
        assert_eq!(mnemonics.len(), table.len());
    }

    #[test]
    fn operand_kinds_are_known() {
        const KNOWN: [&str; 6] = ["Dst", "Src", "Imm", "Slot", "Key", "OptKey"];
        for entry in table() {
            assert!(entry.kinds.len() <= 3, "{} has too many operands", entry.mnemonic);
            for kind in entry.kinds {
                assert!(KNOWN.contains(kind), "{}: unknown kind {kind}", entry.mnemonic);
            }
        }
    }

    #[test]
    fn every_instruction_costs_credits() {
        assert!(table().iter().all(|e| e.cost > 0));
    }
}

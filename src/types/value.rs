//! Tagged value stored in every storage cell and every interpreter slot.
//!
//! Composite values never embed their elements: an `Array` or `Map` root only
//! records its size, and the elements live in keyed cells under the same slot.

use crate::types::address::CellRef;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, read_bytes};
use crate::types::hash::Hash;
use primitive_types::U256;
use std::fmt;

const TAG_NIL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_MAP: u8 = 5;
const TAG_REF: u8 = 6;

/// Runtime and storage value.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Value {
    /// Explicitly stored "nothing"; distinct from an absent cell.
    #[default]
    Nil,
    /// 256-bit unsigned integer with wrapping arithmetic.
    Int(U256),
    /// UTF-8 string.
    Str(String),
    /// Raw binary blob.
    Bytes(Vec<u8>),
    /// Array root; payload is the element count, elements at keys `0..len`.
    Array(u64),
    /// Map root; payload is the entry count.
    Map(u64),
    /// Reference to another cell of the same contract.
    Ref(CellRef),
}

impl Value {
    /// Shorthand for an integer value.
    pub fn int(v: u64) -> Self {
        Value::Int(U256::from(v))
    }

    /// Returns the type name for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Int(_) => "Int",
            Value::Str(_) => "Str",
            Value::Bytes(_) => "Bytes",
            Value::Array(_) => "Array",
            Value::Map(_) => "Map",
            Value::Ref(_) => "Ref",
        }
    }

    /// Truthiness used by conditional jumps.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Int(v) => !v.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Array(_) | Value::Map(_) | Value::Ref(_) => true,
        }
    }

    /// Returns `true` for `Array` and `Map` roots.
    pub const fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Map(_))
    }

    pub fn as_int(&self) -> Option<U256> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Content digest used as the dedup-index key.
    ///
    /// Domain separated so a value never collides with other hashed data.
    pub fn digest(&self) -> Hash {
        let mut h = Hash::tagged(b"VALUE");
        self.encode(&mut h);
        h.finalize()
    }
}

impl From<U256> for Value {
    fn from(v: U256) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Array(len) => write!(f, "array[{len}]"),
            Value::Map(len) => write!(f, "map[{len}]"),
            Value::Ref(cell) => write!(f, "&{cell}"),
        }
    }
}

impl Encode for Value {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            Value::Nil => TAG_NIL.encode(out),
            Value::Int(v) => {
                TAG_INT.encode(out);
                let mut buf = [0u8; 32];
                v.to_little_endian(&mut buf);
                out.write(&buf);
            }
            Value::Str(s) => {
                TAG_STR.encode(out);
                s.encode(out);
            }
            Value::Bytes(b) => {
                TAG_BYTES.encode(out);
                b.len().encode(out);
                out.write(b);
            }
            Value::Array(len) => {
                TAG_ARRAY.encode(out);
                len.encode(out);
            }
            Value::Map(len) => {
                TAG_MAP.encode(out);
                len.encode(out);
            }
            Value::Ref(cell) => {
                TAG_REF.encode(out);
                cell.encode(out);
            }
        }
    }
}

impl Decode for Value {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(match u8::decode(input)? {
            TAG_NIL => Value::Nil,
            TAG_INT => Value::Int(U256::from_little_endian(read_bytes(input, 32)?)),
            TAG_STR => Value::Str(String::decode(input)?),
            TAG_BYTES => {
                let len = usize::decode(input)?;
                Value::Bytes(read_bytes(input, len)?.to_vec())
            }
            TAG_ARRAY => Value::Array(u64::decode(input)?),
            TAG_MAP => Value::Map(u64::decode(input)?),
            TAG_REF => Value::Ref(CellRef::decode(input)?),
            _ => return Err(DecodeError::InvalidValue),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_len_per_variant() {
        assert_eq!(Value::Nil.encoded_len(), 1);
        assert_eq!(Value::int(1337).encoded_len(), 33);
        assert_eq!(Value::from("abc").encoded_len(), 1 + 8 + 3);
        assert_eq!(Value::Bytes(vec![0; 10]).encoded_len(), 1 + 8 + 10);
        assert_eq!(Value::Map(3).encoded_len(), 9);
        assert_eq!(Value::Ref(CellRef::root(4)).encoded_len(), 1 + 8 + 1);
        assert_eq!(Value::Ref(CellRef::keyed(4, 2)).encoded_len(), 1 + 8 + 9);
    }

    #[test]
    fn int_decodes_to_same_value() {
        let v = Value::Int(U256::MAX - U256::from(5));
        assert_eq!(Value::from_bytes(&v.to_bytes()).unwrap(), v);
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(matches!(
            Value::from_bytes(&[0x7f]),
            Err(DecodeError::InvalidValue)
        ));
    }

    #[test]
    fn digest_separates_types_with_same_payload() {
        assert_ne!(Value::Array(2).digest(), Value::Map(2).digest());
        assert_ne!(
            Value::from("ab").digest(),
            Value::Bytes(b"ab".to_vec()).digest()
        );
        assert_eq!(Value::int(9).digest(), Value::int(9).digest());
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::int(0).truthy());
        assert!(Value::int(2).truthy());
        assert!(!Value::from("").truthy());
        assert!(Value::Map(0).truthy());
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::int(42).to_string(), "42");
        assert_eq!(Value::Bytes(vec![0xab, 0x01]).to_string(), "0xab01");
        assert_eq!(Value::Ref(CellRef::keyed(1, 2)).to_string(), "&#1[2]");
    }
}

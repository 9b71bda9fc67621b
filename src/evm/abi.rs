/// Definition of ABI parameter types, generated argument values and their encoding
use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::types::{checksum, EVMAddress, EVMU256};

/// Parameter type that cannot be expressed as a [`TypedValue`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported type `{ty}` for parameter `{param}` of `{member}`")]
pub struct SchemaError {
    pub member: String,
    pub param: String,
    pub ty: String,
}

/// Declared parameter types the fuzzer knows how to generate
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// uintN, N in 8..=256 and a multiple of 8
    Uint(usize),
    /// intN, N in 8..=256 and a multiple of 8
    Int(usize),
    Address,
    Bool,
    String,
    Bytes,
    /// bytesN, N in 1..=32
    FixedBytes(usize),
}

impl ParamType {
    /// Parse a solidity type name. Composite types (arrays, tuples) are rejected.
    pub fn parse(ty: &str) -> Option<Self> {
        match ty {
            "uint" => return Some(ParamType::Uint(256)),
            "int" => return Some(ParamType::Int(256)),
            "address" | "address payable" => return Some(ParamType::Address),
            "bool" => return Some(ParamType::Bool),
            "string" => return Some(ParamType::String),
            "bytes" => return Some(ParamType::Bytes),
            _ => {}
        }
        if let Some(stripped) = ty.strip_prefix("uint") {
            return parse_width(stripped).map(ParamType::Uint);
        }
        if let Some(stripped) = ty.strip_prefix("int") {
            return parse_width(stripped).map(ParamType::Int);
        }
        if let Some(stripped) = ty.strip_prefix("bytes") {
            let len = stripped.parse::<usize>().ok()?;
            if (1..=32).contains(&len) {
                return Some(ParamType::FixedBytes(len));
            }
        }
        None
    }

    /// Dynamic types are encoded out-of-line with an offset in the head
    pub fn is_dynamic(&self) -> bool {
        matches!(self, ParamType::String | ParamType::Bytes)
    }
}

fn parse_width(s: &str) -> Option<usize> {
    let bits = s.parse::<usize>().ok()?;
    if bits % 8 == 0 && (8..=256).contains(&bits) {
        Some(bits)
    } else {
        None
    }
}

impl Display for ParamType {
    /// Canonical name, as used in function signatures
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Uint(bits) => write!(f, "uint{}", bits),
            ParamType::Int(bits) => write!(f, "int{}", bits),
            ParamType::Address => write!(f, "address"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::String => write!(f, "string"),
            ParamType::Bytes => write!(f, "bytes"),
            ParamType::FixedBytes(len) => write!(f, "bytes{}", len),
        }
    }
}

/// A generated argument
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum TypedValue {
    Uint { bits: usize, value: EVMU256 },
    /// `value` holds the two's complement sign-extended to 256 bits
    Int { bits: usize, value: EVMU256 },
    Address(EVMAddress),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    FixedBytes(Vec<u8>),
}

impl TypedValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            TypedValue::Uint { bits, .. } => ParamType::Uint(*bits),
            TypedValue::Int { bits, .. } => ParamType::Int(*bits),
            TypedValue::Address(_) => ParamType::Address,
            TypedValue::Bool(_) => ParamType::Bool,
            TypedValue::String(_) => ParamType::String,
            TypedValue::Bytes(_) => ParamType::Bytes,
            TypedValue::FixedBytes(data) => ParamType::FixedBytes(data.len()),
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, TypedValue::String(_) | TypedValue::Bytes(_))
    }

    /// Head word of a static value
    fn static_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        match self {
            TypedValue::Uint { value, .. } | TypedValue::Int { value, .. } => {
                value.to_big_endian(&mut word);
            }
            TypedValue::Address(addr) => word[12..].copy_from_slice(addr.as_bytes()),
            TypedValue::Bool(b) => word[31] = *b as u8,
            // bytesN is left aligned, unlike every other static type
            TypedValue::FixedBytes(data) => word[..data.len()].copy_from_slice(data),
            TypedValue::String(_) | TypedValue::Bytes(_) => unreachable!("dynamic value has no static word"),
        }
        word
    }

    /// Length-prefixed, right padded tail of a dynamic value
    fn dynamic_tail(&self) -> Vec<u8> {
        let data: &[u8] = match self {
            TypedValue::String(s) => s.as_bytes(),
            TypedValue::Bytes(b) => b,
            _ => unreachable!("static value has no tail"),
        };
        let mut bytes = vec![0u8; 32 + roundup(data.len(), 32)];
        set_size(&mut bytes[..32], data.len());
        bytes[32..32 + data.len()].copy_from_slice(data);
        bytes
    }
}

impl Display for TypedValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Uint { value, .. } => write!(f, "{}", value),
            TypedValue::Int { value, .. } if value.bit(255) => {
                let magnitude = (!*value).overflowing_add(EVMU256::one()).0;
                write!(f, "-{}", magnitude)
            }
            TypedValue::Int { value, .. } => write!(f, "{}", value),
            TypedValue::Address(addr) => write!(f, "{}", checksum(addr)),
            TypedValue::Bool(b) => write!(f, "{}", b),
            TypedValue::String(s) => write!(f, "{:?}", s),
            TypedValue::Bytes(b) | TypedValue::FixedBytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// Render an argument list as `(a, b, c)`
pub fn format_args(args: &[TypedValue]) -> String {
    format!("({})", args.iter().map(|a| a.to_string()).join(", "))
}

/// Calculate the smallest multiple of [`multiplier`] that is larger than or equal to [`x`] (round up)
fn roundup(x: usize, multiplier: usize) -> usize {
    (x + multiplier - 1) / multiplier * multiplier
}

/// Write [`len`] big endian into a 32 byte word
fn set_size(word: &mut [u8], len: usize) {
    EVMU256::from(len).to_big_endian(word);
}

/// ABI-encode a list of arguments as a tuple (head words followed by tails)
pub fn encode_args(args: &[TypedValue]) -> Vec<u8> {
    let head_len = 32 * args.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for arg in args {
        if arg.is_dynamic() {
            let mut offset = [0u8; 32];
            set_size(&mut offset, head_len + tail.len());
            head.extend_from_slice(&offset);
            tail.extend(arg.dynamic_tail());
        } else {
            head.extend_from_slice(&arg.static_word());
        }
    }
    head.extend(tail);
    head
}

/// Transaction data for a function call: selector followed by the encoded arguments
pub fn encode_call(selector: [u8; 4], args: &[TypedValue]) -> Vec<u8> {
    [selector.to_vec(), encode_args(args)].concat()
}

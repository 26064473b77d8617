//! Register payloads and their decoding.

use std::fmt;
use std::ops::Deref;

use crate::error::DecodeError;

/// Abstract data type of a register field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 16-bit unsigned integer (1 register).
    UInt16,
    /// 16-bit signed integer (1 register).
    Int16,
    /// 32-bit unsigned integer (2 registers).
    UInt32,
    /// 32-bit signed integer (2 registers).
    Int32,
    /// 64-bit unsigned integer (4 registers).
    UInt64,
    /// 64-bit signed integer (4 registers).
    Int64,
    /// IEEE 754 single precision (2 registers).
    Float32,
    /// IEEE 754 double precision (4 registers).
    Float64,
    /// ASCII text, two characters per register.
    String,
    /// Raw register words.
    Raw,
}

impl DataType {
    /// Returns the number of registers a numeric type occupies.
    ///
    /// Variable length types return `None`.
    #[must_use]
    pub const fn register_count(self) -> Option<u16> {
        match self {
            Self::UInt16 | Self::Int16 => Some(1),
            Self::UInt32 | Self::Int32 | Self::Float32 => Some(2),
            Self::UInt64 | Self::Int64 | Self::Float64 => Some(4),
            Self::String | Self::Raw => None,
        }
    }

    /// Returns the lowercase name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::UInt32 => "uint32",
            Self::Int32 => "int32",
            Self::UInt64 => "uint64",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order of the 16-bit words in multi-register values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WordOrder {
    /// Most significant word first.
    #[default]
    Big,
    /// Least significant word first.
    Little,
}

/// Configuration for a single register field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterConfig {
    /// Starting register address.
    pub register: u16,
    /// Number of registers to read.
    pub count: u16,
    /// How the registers are decoded.
    pub data_type: DataType,
    /// Word order for multi-register values.
    pub word_order: WordOrder,
    /// Scale applied by callers to reach the physical unit.
    pub scale: f64,
}

impl RegisterConfig {
    /// Creates a field with big word order and a scale of 1.
    #[must_use]
    pub const fn new(register: u16, count: u16, data_type: DataType) -> Self {
        Self {
            register,
            count,
            data_type,
            word_order: WordOrder::Big,
            scale: 1.0,
        }
    }

    /// Sets the word order.
    #[must_use]
    pub const fn word_order(mut self, order: WordOrder) -> Self {
        self.word_order = order;
        self
    }

    /// Sets the scale.
    #[must_use]
    pub const fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// A validated, non-empty set of raw register words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterValues(Vec<u16>);

impl RegisterValues {
    /// Wraps a register payload, returning `None` if it is empty.
    #[must_use]
    pub fn new(words: Vec<u16>) -> Option<Self> {
        if words.is_empty() {
            None
        } else {
            Some(Self(words))
        }
    }

    /// Returns the raw words.
    #[must_use]
    pub fn into_inner(self) -> Vec<u16> {
        self.0
    }

    /// Decodes the words according to a field configuration.
    pub fn decode(&self, config: &RegisterConfig) -> Result<Value, DecodeError> {
        let words = &self.0;
        match config.data_type {
            DataType::Raw => return Ok(Value::Raw(words.clone())),
            DataType::String => return Ok(Value::Text(decode_ascii(words))),
            _ => {}
        }

        let unsupported = || DecodeError::UnsupportedCount {
            data_type: config.data_type,
            count: words.len(),
        };

        if !matches!(words.len(), 1 | 2 | 4) {
            return Err(unsupported());
        }

        let mut ordered = words.clone();
        if config.word_order == WordOrder::Little {
            ordered.reverse();
        }
        let bytes: Vec<u8> = ordered.iter().flat_map(|w| w.to_be_bytes()).collect();

        let value = match (config.data_type, bytes.len()) {
            (DataType::UInt16, 2) => Value::UInt(u64::from(u16::from_be_bytes([bytes[0], bytes[1]]))),
            (DataType::Int16, 2) => Value::Int(i64::from(i16::from_be_bytes([bytes[0], bytes[1]]))),
            (DataType::UInt32, 4) => Value::UInt(u64::from(u32::from_be_bytes(array(&bytes)))),
            (DataType::Int32, 4) => Value::Int(i64::from(i32::from_be_bytes(array(&bytes)))),
            (DataType::Float32, 4) => Value::Float(f64::from(f32::from_be_bytes(array(&bytes)))),
            (DataType::UInt64, 8) => Value::UInt(u64::from_be_bytes(array(&bytes))),
            (DataType::Int64, 8) => Value::Int(i64::from_be_bytes(array(&bytes))),
            (DataType::Float64, 8) => Value::Float(f64::from_be_bytes(array(&bytes))),
            _ => return Err(unsupported()),
        };
        Ok(value)
    }
}

impl Deref for RegisterValues {
    type Target = [u16];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Copies a byte slice of known length into an array.
fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Decodes ASCII text, dropping NUL padding and surrounding whitespace.
fn decode_ascii(words: &[u16]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .filter(|b| *b != 0 && b.is_ascii())
        .collect();
    String::from_utf8_lossy(&bytes).trim().to_owned()
}

/// A decoded register value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned integer.
    UInt(u64),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Text(String),
    /// Raw register words.
    Raw(Vec<u16>),
}

impl Value {
    /// Returns the value as a float if it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::UInt(v) => Some(*v as f64),
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) | Self::Raw(_) => None,
        }
    }
}

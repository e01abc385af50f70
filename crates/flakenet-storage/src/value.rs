//! Value model: the tagged union carried by every entry, plus `Section`,
//! the ordered (name, value) record it all hangs off.

use crate::error::{Result, StorageError};

/// Serialize type tags as they appear on the wire (without the array bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    I64 = 1,
    I32 = 2,
    I16 = 3,
    I8 = 4,
    U64 = 5,
    U32 = 6,
    U16 = 7,
    U8 = 8,
    F64 = 9,
    String = 10,
    Bool = 11,
    Object = 12,
}

impl TypeTag {
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => TypeTag::I64,
            2 => TypeTag::I32,
            3 => TypeTag::I16,
            4 => TypeTag::I8,
            5 => TypeTag::U64,
            6 => TypeTag::U32,
            7 => TypeTag::U16,
            8 => TypeTag::U8,
            9 => TypeTag::F64,
            10 => TypeTag::String,
            11 => TypeTag::Bool,
            12 => TypeTag::Object,
            tag => return Err(StorageError::UnknownTag { tag }),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::I64 => "int64",
            TypeTag::I32 => "int32",
            TypeTag::I16 => "int16",
            TypeTag::I8 => "int8",
            TypeTag::U64 => "uint64",
            TypeTag::U32 => "uint32",
            TypeTag::U16 => "uint16",
            TypeTag::U8 => "uint8",
            TypeTag::F64 => "float64",
            TypeTag::String => "string",
            TypeTag::Bool => "bool",
            TypeTag::Object => "object",
        }
    }
}

/// One decoded entry value.
///
/// Wire strings are length-prefixed byte blobs. They usually hold UTF-8
/// text but the protocol also stuffs raw hashes in them (top block id), so
/// the variant keeps bytes and conversion to `String` is fallible.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I64(i64),
    I32(i32),
    I16(i16),
    I8(i8),
    U64(u64),
    U32(u32),
    U16(u16),
    U8(u8),
    F64(f64),
    Bool(bool),
    String(Vec<u8>),
    Object(Section),
    Array(Array),
}

/// Homogeneous array: one shared element tag, elements encoded without
/// per-element tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub elem: TypeTag,
    pub items: Vec<Value>,
}

impl Array {
    pub fn new(elem: TypeTag) -> Self {
        Self {
            elem,
            items: Vec::new(),
        }
    }
}

impl Value {
    /// Wire tag for this value (array bit not included).
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::I64(_) => TypeTag::I64,
            Value::I32(_) => TypeTag::I32,
            Value::I16(_) => TypeTag::I16,
            Value::I8(_) => TypeTag::I8,
            Value::U64(_) => TypeTag::U64,
            Value::U32(_) => TypeTag::U32,
            Value::U16(_) => TypeTag::U16,
            Value::U8(_) => TypeTag::U8,
            Value::F64(_) => TypeTag::F64,
            Value::Bool(_) => TypeTag::Bool,
            Value::String(_) => TypeTag::String,
            Value::Object(_) => TypeTag::Object,
            // Arrays reuse the element tag; callers OR in ARRAY_MASK.
            Value::Array(a) => a.elem,
        }
    }

    fn found(&self) -> &'static str {
        match self {
            Value::Array(a) => a.elem.name(),
            other => other.tag().name(),
        }
    }

    /// Unsigned extraction. The wire tag picked the width that was read;
    /// any unsigned wire value may land in any unsigned field provided it
    /// fits.
    pub fn as_unsigned(&self, target: &'static str, max: u64) -> Result<u64> {
        let raw = match *self {
            Value::U64(v) => v,
            Value::U32(v) => u64::from(v),
            Value::U16(v) => u64::from(v),
            Value::U8(v) => u64::from(v),
            ref other => {
                return Err(StorageError::TypeMismatch {
                    expected: target,
                    found: other.found(),
                })
            }
        };
        if raw > max {
            return Err(StorageError::IntOutOfRange {
                value: raw as i128,
                target,
            });
        }
        Ok(raw)
    }

    /// Signed counterpart of [`Value::as_unsigned`].
    pub fn as_signed(&self, target: &'static str, min: i64, max: i64) -> Result<i64> {
        let raw = match *self {
            Value::I64(v) => v,
            Value::I32(v) => i64::from(v),
            Value::I16(v) => i64::from(v),
            Value::I8(v) => i64::from(v),
            ref other => {
                return Err(StorageError::TypeMismatch {
                    expected: target,
                    found: other.found(),
                })
            }
        };
        if raw < min || raw > max {
            return Err(StorageError::IntOutOfRange {
                value: raw as i128,
                target,
            });
        }
        Ok(raw)
    }

    pub fn as_u64(&self) -> Result<u64> {
        self.as_unsigned("uint64", u64::MAX)
    }

    pub fn as_u32(&self) -> Result<u32> {
        Ok(self.as_unsigned("uint32", u64::from(u32::MAX))? as u32)
    }

    pub fn as_u16(&self) -> Result<u16> {
        Ok(self.as_unsigned("uint16", u64::from(u16::MAX))? as u16)
    }

    pub fn as_u8(&self) -> Result<u8> {
        Ok(self.as_unsigned("uint8", u64::from(u8::MAX))? as u8)
    }

    pub fn as_i64(&self) -> Result<i64> {
        self.as_signed("int64", i64::MIN, i64::MAX)
    }

    pub fn as_i32(&self) -> Result<i32> {
        Ok(self.as_signed("int32", i64::from(i32::MIN), i64::from(i32::MAX))? as i32)
    }

    pub fn as_i16(&self) -> Result<i16> {
        Ok(self.as_signed("int16", i64::from(i16::MIN), i64::from(i16::MAX))? as i16)
    }

    pub fn as_i8(&self) -> Result<i8> {
        Ok(self.as_signed("int8", i64::from(i8::MIN), i64::from(i8::MAX))? as i8)
    }

    pub fn as_f64(&self) -> Result<f64> {
        match *self {
            Value::F64(v) => Ok(v),
            ref other => Err(StorageError::TypeMismatch {
                expected: "float64",
                found: other.found(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            Value::Bool(v) => Ok(v),
            ref other => Err(StorageError::TypeMismatch {
                expected: "bool",
                found: other.found(),
            }),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Value::String(v) => Ok(v),
            other => Err(StorageError::TypeMismatch {
                expected: "string",
                found: other.found(),
            }),
        }
    }

    pub fn into_string(self) -> Result<String> {
        String::from_utf8(self.into_bytes()?).map_err(|_| StorageError::InvalidUtf8)
    }

    pub fn into_section(self) -> Result<Section> {
        match self {
            Value::Object(s) => Ok(s),
            other => Err(StorageError::TypeMismatch {
                expected: "object",
                found: other.found(),
            }),
        }
    }

    pub fn into_array(self) -> Result<Array> {
        match self {
            Value::Array(a) => Ok(a),
            other => Err(StorageError::TypeMismatch {
                expected: "array",
                found: other.found(),
            }),
        }
    }

    /// Convenience for text fields.
    pub fn text(s: &str) -> Value {
        Value::String(s.as_bytes().to_vec())
    }
}

/// An ordered set of (name, value) entries. Order matters only for
/// encoding determinism; decoding is keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    entries: Vec<(String, Value)>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.entries.push((name.to_owned(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

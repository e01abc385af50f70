//! Encoding: storage header, entry loop, values, arrays.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, StorageError};
use crate::storable::Storable;
use crate::value::{Array, Section, TypeTag, Value};
use crate::varint::write_varint;
use crate::{ARRAY_MASK, MAX_NAME_LEN, STORAGE_SIGNATURE, STORAGE_VERSION};

/// Encode a record to its full wire form: 9-byte storage header followed
/// by the root section.
pub fn to_bytes<T: Storable>(record: &T) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_u64_le(STORAGE_SIGNATURE);
    buf.put_u8(STORAGE_VERSION);
    write_section(&mut buf, &record.to_section())?;
    Ok(buf.to_vec())
}

fn write_section(buf: &mut BytesMut, section: &Section) -> Result<()> {
    write_varint(buf, section.len() as u64)?;
    for (name, value) in section.entries() {
        write_name(buf, name)?;
        write_value(buf, value)?;
    }
    Ok(())
}

fn write_name(buf: &mut BytesMut, name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(StorageError::NameTooLong { len: name.len() });
    }
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    Ok(())
}

fn write_value(buf: &mut BytesMut, value: &Value) -> Result<()> {
    match value {
        Value::Array(array) => {
            buf.put_u8(array.elem as u8 | ARRAY_MASK);
            write_array(buf, array)
        }
        scalar => {
            buf.put_u8(scalar.tag() as u8);
            write_payload(buf, scalar)
        }
    }
}

fn write_array(buf: &mut BytesMut, array: &Array) -> Result<()> {
    write_varint(buf, array.items.len() as u64)?;
    for item in &array.items {
        // Shared element tag; arrays of arrays are not representable.
        if item.tag() != array.elem || matches!(item, Value::Array(_)) {
            return Err(StorageError::ArrayKindMismatch {
                expected: array.elem.name(),
                found: item.tag().name(),
            });
        }
        write_payload(buf, item)?;
    }
    Ok(())
}

/// Value payload without its leading tag. Numbers are fixed-width
/// little-endian, native two's-complement / IEEE-754, no normalization.
fn write_payload(buf: &mut BytesMut, value: &Value) -> Result<()> {
    match value {
        Value::I64(v) => buf.put_i64_le(*v),
        Value::I32(v) => buf.put_i32_le(*v),
        Value::I16(v) => buf.put_i16_le(*v),
        Value::I8(v) => buf.put_i8(*v),
        Value::U64(v) => buf.put_u64_le(*v),
        Value::U32(v) => buf.put_u32_le(*v),
        Value::U16(v) => buf.put_u16_le(*v),
        Value::U8(v) => buf.put_u8(*v),
        Value::F64(v) => buf.put_f64_le(*v),
        Value::Bool(v) => buf.put_u8(u8::from(*v)),
        Value::String(v) => {
            write_varint(buf, v.len() as u64)?;
            buf.put_slice(v);
        }
        Value::Object(section) => write_section(buf, section)?,
        Value::Array(_) => unreachable!("array payloads go through write_array"),
    }
    Ok(())
}

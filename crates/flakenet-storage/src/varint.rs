//! Width-tagged variable-length integers.
//!
//! The low 2 bits of the first byte select the encoded width (0 = 8-bit,
//! 1 = 16-bit, 2 = 32-bit, 3 = 64-bit); the remaining bits hold the value
//! shifted left by 2. Little-endian throughout. Encoding always picks the
//! smallest width that fits, so 62 bits is the ceiling.

use bytes::BufMut;

use crate::error::{Result, StorageError};

const WIDTH_8: u8 = 0;
const WIDTH_16: u8 = 1;
const WIDTH_32: u8 = 2;
const WIDTH_64: u8 = 3;

/// Largest encodable value.
pub const MAX_VARINT: u64 = (1 << 62) - 1;

pub fn write_varint(buf: &mut impl BufMut, value: u64) -> Result<()> {
    if value <= 0x3f {
        buf.put_u8((value as u8) << 2 | WIDTH_8);
    } else if value <= 0x3fff {
        buf.put_u16_le((value as u16) << 2 | WIDTH_16 as u16);
    } else if value <= 0x3fff_ffff {
        buf.put_u32_le((value as u32) << 2 | WIDTH_32 as u32);
    } else if value <= MAX_VARINT {
        buf.put_u64_le(value << 2 | WIDTH_64 as u64);
    } else {
        return Err(StorageError::VarintTooLarge { value });
    }
    Ok(())
}

pub fn read_varint(input: &mut &[u8]) -> Result<u64> {
    let first = take(input, 1)?[0];
    let value = match first & 0x3 {
        WIDTH_8 => u64::from(first) >> 2,
        WIDTH_16 => {
            let rest = take(input, 1)?;
            u64::from(u16::from_le_bytes([first, rest[0]])) >> 2
        }
        WIDTH_32 => {
            let rest = take(input, 3)?;
            u64::from(u32::from_le_bytes([first, rest[0], rest[1], rest[2]])) >> 2
        }
        _ => {
            let rest = take(input, 7)?;
            let mut raw = [0u8; 8];
            raw[0] = first;
            raw[1..].copy_from_slice(rest);
            u64::from_le_bytes(raw) >> 2
        }
    };
    Ok(value)
}

/// Split `n` bytes off the front of `input`, or fail on a short buffer.
pub(crate) fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if input.len() < n {
        return Err(StorageError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

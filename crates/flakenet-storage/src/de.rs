//! Decoding: self-describing parse into a `Section`, strictly per wire
//! tags. Typed extraction happens afterwards in [`crate::storable`].

use crate::error::{Result, StorageError};
use crate::storable::Storable;
use crate::value::{Array, Section, TypeTag, Value};
use crate::varint::{read_varint, take};
use crate::{ARRAY_MASK, STORAGE_SIGNATURE, STORAGE_VERSION};

/// Decode a full wire payload (storage header + root section) into a
/// typed record.
pub fn from_bytes<T: Storable>(data: &[u8]) -> Result<T> {
    // A zero-length payload stands for an empty record: fine for shapes
    // with no declared fields, MissingEntry for anything else.
    if data.is_empty() {
        return T::from_section(Section::new());
    }
    let mut input = data;
    read_header(&mut input)?;
    let section = read_section(&mut input)?;
    T::from_section(section)
}

fn read_header(input: &mut &[u8]) -> Result<()> {
    let raw = take(input, 8)?;
    let signature = u64::from_le_bytes(raw.try_into().expect("8-byte slice"));
    if signature != STORAGE_SIGNATURE {
        return Err(StorageError::BadSignature { got: signature });
    }
    let version = take(input, 1)?[0];
    if version != STORAGE_VERSION {
        return Err(StorageError::BadVersion { got: version });
    }
    Ok(())
}

fn read_section(input: &mut &[u8]) -> Result<Section> {
    let count = read_varint(input)?;
    let mut section = Section::new();
    for _ in 0..count {
        let name = read_name(input)?;
        let value = read_entry(input)?;
        section.insert(&name, value);
    }
    Ok(section)
}

fn read_name(input: &mut &[u8]) -> Result<String> {
    let len = take(input, 1)?[0] as usize;
    let raw = take(input, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| StorageError::InvalidUtf8)
}

fn read_entry(input: &mut &[u8]) -> Result<Value> {
    let raw_tag = take(input, 1)?[0];
    if raw_tag & ARRAY_MASK != 0 {
        let elem = TypeTag::from_u8(raw_tag & !ARRAY_MASK)?;
        read_array(input, elem)
    } else {
        read_value(input, TypeTag::from_u8(raw_tag)?)
    }
}

fn read_array(input: &mut &[u8], elem: TypeTag) -> Result<Value> {
    let count = read_varint(input)?;
    let mut array = Array::new(elem);
    for _ in 0..count {
        array.items.push(read_value(input, elem)?);
    }
    Ok(Value::Array(array))
}

/// Read one value payload; the wire tag alone governs how many bytes are
/// consumed.
fn read_value(input: &mut &[u8], tag: TypeTag) -> Result<Value> {
    Ok(match tag {
        TypeTag::I64 => Value::I64(i64::from_le_bytes(take(input, 8)?.try_into().unwrap())),
        TypeTag::I32 => Value::I32(i32::from_le_bytes(take(input, 4)?.try_into().unwrap())),
        TypeTag::I16 => Value::I16(i16::from_le_bytes(take(input, 2)?.try_into().unwrap())),
        TypeTag::I8 => Value::I8(take(input, 1)?[0] as i8),
        TypeTag::U64 => Value::U64(u64::from_le_bytes(take(input, 8)?.try_into().unwrap())),
        TypeTag::U32 => Value::U32(u32::from_le_bytes(take(input, 4)?.try_into().unwrap())),
        TypeTag::U16 => Value::U16(u16::from_le_bytes(take(input, 2)?.try_into().unwrap())),
        TypeTag::U8 => Value::U8(take(input, 1)?[0]),
        TypeTag::F64 => Value::F64(f64::from_le_bytes(take(input, 8)?.try_into().unwrap())),
        TypeTag::Bool => Value::Bool(take(input, 1)?[0] != 0),
        TypeTag::String => {
            let len = read_varint(input)? as usize;
            Value::String(take(input, len)?.to_vec())
        }
        TypeTag::Object => Value::Object(read_section(input)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::to_bytes;
    use crate::storable::SectionReader;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Inner {
        ip: u32,
        port: u16,
    }

    impl Storable for Inner {
        fn to_section(&self) -> Section {
            let mut s = Section::new();
            s.insert("m_ip", Value::U32(self.ip));
            s.insert("m_port", Value::U16(self.port));
            s
        }

        fn from_section(section: Section) -> Result<Self> {
            let mut r = SectionReader::new(section);
            let out = Self {
                ip: r.take("m_ip")?.as_u32()?,
                port: r.take("m_port")?.as_u16()?,
            };
            r.finish()?;
            Ok(out)
        }
    }

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Outer {
        name: String,
        seen: i64,
        ratio: f64,
        live: bool,
        addr: Inner,
        ports: Vec<u16>,
    }

    impl Storable for Outer {
        fn to_section(&self) -> Section {
            let mut s = Section::new();
            s.insert("name", Value::text(&self.name));
            s.insert("seen", Value::I64(self.seen));
            s.insert("ratio", Value::F64(self.ratio));
            s.insert("live", Value::Bool(self.live));
            s.insert("addr", Value::Object(self.addr.to_section()));
            let mut ports = Array::new(TypeTag::U16);
            ports.items = self.ports.iter().map(|p| Value::U16(*p)).collect();
            s.insert("ports", Value::Array(ports));
            s
        }

        fn from_section(section: Section) -> Result<Self> {
            let mut r = SectionReader::new(section);
            let out = Self {
                name: r.take("name")?.into_string()?,
                seen: r.take("seen")?.as_i64()?,
                ratio: r.take("ratio")?.as_f64()?,
                live: r.take("live")?.as_bool()?,
                addr: Inner::from_section(r.take("addr")?.into_section()?)?,
                ports: {
                    let array = r.take("ports")?.into_array()?;
                    if array.elem != TypeTag::U16 {
                        return Err(StorageError::ArrayKindMismatch {
                            expected: TypeTag::U16.name(),
                            found: array.elem.name(),
                        });
                    }
                    array
                        .items
                        .into_iter()
                        .map(|v| v.as_u16())
                        .collect::<Result<_>>()?
                },
            };
            r.finish()?;
            Ok(out)
        }
    }

    fn sample() -> Outer {
        Outer {
            name: "snowfall".into(),
            seen: -44,
            ratio: 0.75,
            live: true,
            addr: Inner {
                ip: 0x7b7b7b7b,
                port: 12560,
            },
            ports: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_roundtrip_nested_and_arrays() {
        let original = sample();
        let bytes = to_bytes(&original).unwrap();
        let back: Outer = from_bytes(&bytes).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_empty_array_roundtrip() {
        let original = Outer {
            ports: vec![],
            ..sample()
        };
        let bytes = to_bytes(&original).unwrap();
        let back: Outer = from_bytes(&bytes).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let mut bytes = to_bytes(&sample()).unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            from_bytes::<Outer>(&bytes),
            Err(StorageError::BadSignature { .. })
        ));
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = to_bytes(&sample()).unwrap();
        bytes[8] = 2;
        assert!(matches!(
            from_bytes::<Outer>(&bytes),
            Err(StorageError::BadVersion { got: 2 })
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut bytes = to_bytes(&Inner::default()).unwrap();
        // Tag byte of m_ip sits after header(9) + count(1) + name len(1) + "m_ip"(4).
        bytes[15] = 0x1f;
        assert!(matches!(
            from_bytes::<Inner>(&bytes),
            Err(StorageError::UnknownTag { tag: 0x1f })
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let bytes = to_bytes(&sample()).unwrap();
        let short = &bytes[..bytes.len() - 1];
        assert!(matches!(
            from_bytes::<Outer>(short),
            Err(StorageError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_wire_tag_governs_width() {
        // Encode the ip as uint8 on the wire; the uint32 field accepts it.
        struct NarrowInner;
        impl Storable for NarrowInner {
            fn to_section(&self) -> Section {
                let mut s = Section::new();
                s.insert("m_ip", Value::U8(9));
                s.insert("m_port", Value::U16(7));
                s
            }
            fn from_section(_: Section) -> Result<Self> {
                Ok(NarrowInner)
            }
        }
        let bytes = to_bytes(&NarrowInner).unwrap();
        let back: Inner = from_bytes(&bytes).unwrap();
        assert_eq!(back, Inner { ip: 9, port: 7 });
    }

    #[test]
    fn test_signed_unsigned_mismatch() {
        struct SignedInner;
        impl Storable for SignedInner {
            fn to_section(&self) -> Section {
                let mut s = Section::new();
                s.insert("m_ip", Value::I32(9));
                s.insert("m_port", Value::U16(7));
                s
            }
            fn from_section(_: Section) -> Result<Self> {
                Ok(SignedInner)
            }
        }
        let bytes = to_bytes(&SignedInner).unwrap();
        assert!(matches!(
            from_bytes::<Inner>(&bytes),
            Err(StorageError::TypeMismatch { .. })
        ));
    }
}

//! Typed layer over sections.
//!
//! Each record type declares its wire shape by implementing [`Storable`]
//! explicitly: `to_section` lists every (name, value) entry, and
//! `from_section` pulls each declared name out of a [`SectionReader`],
//! which enforces the exactly-once contract -- a declared field must be
//! present, may not repeat, and nothing undeclared may remain.

use crate::error::{Result, StorageError};
use crate::value::{Array, Section, TypeTag, Value};

pub trait Storable: Sized {
    fn to_section(&self) -> Section;
    fn from_section(section: Section) -> Result<Self>;
}

/// Destructive, name-keyed view of a decoded section.
pub struct SectionReader {
    entries: Vec<Option<(String, Value)>>,
    taken: Vec<&'static str>,
}

impl SectionReader {
    pub fn new(section: Section) -> Self {
        Self {
            entries: section.into_entries().into_iter().map(Some).collect(),
            taken: Vec::new(),
        }
    }

    /// Remove and return the entry named `name`. Wire order is irrelevant;
    /// the first occurrence wins and a second occurrence is caught by
    /// [`SectionReader::finish`].
    pub fn take(&mut self, name: &'static str) -> Result<Value> {
        for slot in &mut self.entries {
            if slot.as_ref().is_some_and(|(n, _)| n == name) {
                let (_, value) = slot.take().expect("slot checked above");
                self.taken.push(name);
                return Ok(value);
            }
        }
        Err(StorageError::MissingEntry { name })
    }

    /// Fail if any entry was not consumed: a leftover with a taken name is
    /// a duplicate, anything else was never declared.
    pub fn finish(self) -> Result<()> {
        for slot in self.entries {
            if let Some((name, _)) = slot {
                if self.taken.contains(&name.as_str()) {
                    return Err(StorageError::DuplicateEntry { name });
                }
                return Err(StorageError::UnexpectedEntry { name });
            }
        }
        Ok(())
    }
}

/// Convert an object-array value into typed records; the shared element
/// tag must be `object`.
pub fn section_array<T: Storable>(value: Value) -> Result<Vec<T>> {
    let array = value.into_array()?;
    if array.elem != TypeTag::Object {
        return Err(StorageError::ArrayKindMismatch {
            expected: TypeTag::Object.name(),
            found: array.elem.name(),
        });
    }
    array
        .items
        .into_iter()
        .map(|item| T::from_section(item.into_section()?))
        .collect()
}

/// Build an object-array value from typed records.
pub fn sections_to_array<T: Storable>(records: &[T]) -> Value {
    let mut array = Array::new(TypeTag::Object);
    array.items = records
        .iter()
        .map(|r| Value::Object(r.to_section()))
        .collect();
    Value::Array(array)
}

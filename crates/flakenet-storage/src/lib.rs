//! Portable storage -- self-describing structured binary codec.
//!
//! Payloads are records of (name, value) entries. Field names key the
//! decode (wire order is irrelevant); values carry their own type tags so
//! a buffer can be parsed without knowing the target shape up front. The
//! typed layer on top (`Storable`) then extracts every declared field
//! exactly once and rejects anything left over.

pub mod de;
pub mod error;
pub mod ser;
pub mod storable;
pub mod value;
pub mod varint;

pub use de::from_bytes;
pub use error::{Result, StorageError};
pub use ser::to_bytes;
pub use storable::{section_array, sections_to_array, SectionReader, Storable};
pub use value::{Array, Section, TypeTag, Value};

/// Appears once at the start of every encoded payload.
pub const STORAGE_SIGNATURE: u64 = 0x0102_0101_0101_1101;

/// Storage format version; only 1 exists.
pub const STORAGE_VERSION: u8 = 1;

/// High bit of a type tag marks a homogeneous array of that element type.
pub const ARRAY_MASK: u8 = 0x80;

/// Entry names are length-prefixed with a single byte.
pub const MAX_NAME_LEN: usize = 0xff;

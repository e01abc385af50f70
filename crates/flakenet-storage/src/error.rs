use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Codec faults. All are fatal to the single encode/decode call; the
/// caller decides what to do with the stream the payload came from.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage signature mismatch: got {got:#018x}")]
    BadSignature { got: u64 },

    #[error("unsupported storage version {got}")]
    BadVersion { got: u8 },

    #[error("varint value {value} does not fit the 62-bit payload")]
    VarintTooLarge { value: u64 },

    #[error("entry name is {len} bytes (max 255)")]
    NameTooLong { len: usize },

    #[error("unknown serialize type tag {tag:#04x}")]
    UnknownTag { tag: u8 },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("array element kind mismatch: expected {expected}, found {found}")]
    ArrayKindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("integer {value} out of range for {target}")]
    IntOutOfRange { value: i128, target: &'static str },

    #[error("entry {name:?} is missing")]
    MissingEntry { name: &'static str },

    #[error("entry {name:?} appears more than once")]
    DuplicateEntry { name: String },

    #[error("undeclared entry {name:?}")]
    UnexpectedEntry { name: String },

    #[error("string entry is not valid UTF-8")]
    InvalidUtf8,

    #[error("unexpected end of input")]
    UnexpectedEof,
}

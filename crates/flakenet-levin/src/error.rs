use thiserror::Error;

pub type Result<T> = std::result::Result<T, LevinError>;

#[derive(Debug, Error)]
pub enum LevinError {
    #[error("invalid bucket signature {got:#018x}")]
    BadSignature { got: u64 },

    #[error("unsupported levin protocol version {got}")]
    BadVersion { got: u32 },

    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: u64, max: u64 },

    #[error("operation timed out")]
    TimedOut,

    #[error("connection closed")]
    ConnectionClosed,

    // Programming error, never triggered by remote input: a waiter for
    // this command id is already registered.
    #[error("command {command} already has a pending invocation")]
    CommandBusy { command: u32 },

    #[error(transparent)]
    Storage(#[from] flakenet_storage::StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Levin -- the framed request/response wire protocol between nodes.
//!
//! Every packet is a fixed 33-byte bucket head followed by a portable
//! storage payload. One connection multiplexes any number of concurrent
//! invocations, correlated by command id; a dedicated dispatch task owns
//! the read half and routes responses to waiting callers.

pub mod codec;
pub mod connection;
pub mod error;

pub use codec::{BucketCodec, BucketHead, Frame};
pub use connection::{Connection, IncomingMessage};
pub use error::{LevinError, Result};

/// Appears at the beginning of every levin packet.
pub const LEVIN_SIGNATURE: u64 = 0x0101_0101_0101_2101;

/// Only protocol version 1 exists.
pub const LEVIN_VERSION: u32 = 1;

/// Serialized bucket head size in bytes.
pub const BUCKET_HEAD_SIZE: usize = 33;

/// Upper bound on a single packet's payload.
pub const MAX_PACKET_SIZE: u64 = 16 * 1024 * 1024;

/// Packet flag values.
pub const FLAG_REQUEST: u32 = 1;
pub const FLAG_RESPONSE: u32 = 2;

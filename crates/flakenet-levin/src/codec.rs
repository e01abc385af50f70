//! Bucket framing over a byte stream.
//!
//! Wire layout, little-endian, 33 bytes then payload:
//!   signature u64 | payload length u64 | needs-response u8 | command u32 |
//!   return code i32 | flags u32 | protocol version u32
//!
//! Inbound heads are validated signature -> version -> size bound, short-
//! circuiting on the first failure and before a single payload byte is
//! consumed. Any failure is fatal to the connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::LevinError;
use crate::{BUCKET_HEAD_SIZE, FLAG_REQUEST, FLAG_RESPONSE, LEVIN_SIGNATURE, LEVIN_VERSION, MAX_PACKET_SIZE};

/// Fixed-size head of one levin packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketHead {
    pub signature: u64,
    pub packet_size: u64,
    pub needs_response: bool,
    pub command: u32,
    pub return_code: i32,
    pub flags: u32,
    pub protocol_version: u32,
}

impl BucketHead {
    /// Head for an outgoing request that expects a correlated response.
    pub fn request(command: u32, packet_size: u64) -> Self {
        Self {
            signature: LEVIN_SIGNATURE,
            packet_size,
            needs_response: true,
            command,
            return_code: 0,
            flags: FLAG_REQUEST,
            protocol_version: LEVIN_VERSION,
        }
    }

    /// Head for a fire-and-forget notification.
    pub fn notification(command: u32, packet_size: u64) -> Self {
        Self {
            needs_response: false,
            ..Self::request(command, packet_size)
        }
    }

    /// Head for a response carrying `return_code`.
    pub fn response(command: u32, packet_size: u64, return_code: i32) -> Self {
        Self {
            needs_response: false,
            return_code,
            flags: FLAG_RESPONSE,
            ..Self::request(command, packet_size)
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags == FLAG_RESPONSE
    }

    fn parse(raw: &[u8]) -> Result<Self, LevinError> {
        debug_assert_eq!(raw.len(), BUCKET_HEAD_SIZE);
        let head = Self {
            signature: u64::from_le_bytes(raw[0..8].try_into().expect("8 bytes")),
            packet_size: u64::from_le_bytes(raw[8..16].try_into().expect("8 bytes")),
            needs_response: raw[16] != 0,
            command: u32::from_le_bytes(raw[17..21].try_into().expect("4 bytes")),
            return_code: i32::from_le_bytes(raw[21..25].try_into().expect("4 bytes")),
            flags: u32::from_le_bytes(raw[25..29].try_into().expect("4 bytes")),
            protocol_version: u32::from_le_bytes(raw[29..33].try_into().expect("4 bytes")),
        };
        if head.signature != LEVIN_SIGNATURE {
            return Err(LevinError::BadSignature {
                got: head.signature,
            });
        }
        if head.protocol_version != LEVIN_VERSION {
            return Err(LevinError::BadVersion {
                got: head.protocol_version,
            });
        }
        if head.packet_size > MAX_PACKET_SIZE {
            return Err(LevinError::PacketTooLarge {
                size: head.packet_size,
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(head)
    }

    fn write(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.signature);
        dst.put_u64_le(self.packet_size);
        dst.put_u8(u8::from(self.needs_response));
        dst.put_u32_le(self.command);
        dst.put_i32_le(self.return_code);
        dst.put_u32_le(self.flags);
        dst.put_u32_le(self.protocol_version);
    }
}

/// One framed packet.
#[derive(Debug, Clone)]
pub struct Frame {
    pub head: BucketHead,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(head: BucketHead, payload: Bytes) -> Self {
        Self { head, payload }
    }
}

/// Codec for framing buckets over a byte stream.
#[derive(Debug, Default)]
pub struct BucketCodec {
    // Head of the packet whose payload we are still waiting for.
    pending: Option<BucketHead>,
}

impl BucketCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for BucketCodec {
    type Item = Frame;
    type Error = LevinError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let head = match self.pending {
            Some(head) => head,
            None => {
                if src.len() < BUCKET_HEAD_SIZE {
                    return Ok(None);
                }
                let head = BucketHead::parse(&src[..BUCKET_HEAD_SIZE])?;
                src.advance(BUCKET_HEAD_SIZE);
                self.pending = Some(head);
                head
            }
        };

        let size = head.packet_size as usize;
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        self.pending = None;
        let payload = src.split_to(size).freeze();
        Ok(Some(Frame::new(head, payload)))
    }
}

impl Encoder<Frame> for BucketCodec {
    type Error = LevinError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() as u64 > MAX_PACKET_SIZE {
            return Err(LevinError::PacketTooLarge {
                size: item.payload.len() as u64,
                max: MAX_PACKET_SIZE,
            });
        }
        dst.reserve(BUCKET_HEAD_SIZE + item.payload.len());
        item.head.write(dst);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(command: u32, payload: &[u8]) -> Frame {
        Frame::new(
            BucketHead::request(command, payload.len() as u64),
            Bytes::copy_from_slice(payload),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = BucketCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(frame(1001, b"payload"), &mut buf).unwrap();
        assert_eq!(buf.len(), BUCKET_HEAD_SIZE + 7);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.head.command, 1001);
        assert_eq!(decoded.head.flags, FLAG_REQUEST);
        assert!(decoded.head.needs_response);
        assert_eq!(&decoded.payload[..], b"payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_head_and_payload() {
        let mut codec = BucketCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(frame(7, b"abcdef"), &mut buf).unwrap();

        let mut partial = buf.split_to(BUCKET_HEAD_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf.split_to(3));
        // Full head, partial payload.
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(&decoded.payload[..], b"abcdef");
    }

    #[test]
    fn test_multiple_frames() {
        let mut codec = BucketCodec::new();
        let mut buf = BytesMut::new();
        for i in 0..4u32 {
            codec.encode(frame(i, &[i as u8]), &mut buf).unwrap();
        }
        for i in 0..4u32 {
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded.head.command, i);
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_flipped_signature_byte_rejected() {
        let mut codec = BucketCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(frame(1, b"x"), &mut buf).unwrap();
        buf[3] ^= 0x40;
        assert!(matches!(
            codec.decode(&mut buf),
            Err(LevinError::BadSignature { .. })
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut codec = BucketCodec::new();
        let mut buf = BytesMut::new();
        let mut head = BucketHead::request(1, 0);
        head.protocol_version = 2;
        codec
            .encode(Frame::new(head, Bytes::new()), &mut buf)
            .unwrap();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(LevinError::BadVersion { got: 2 })
        ));
    }

    #[test]
    fn test_oversize_rejected_on_head_alone() {
        let mut codec = BucketCodec::new();
        let mut buf = BytesMut::new();
        // Declare 16 MiB + 1 without supplying any payload bytes.
        BucketHead::request(1, MAX_PACKET_SIZE + 1).write(&mut buf);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(LevinError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn test_validation_order_signature_first() {
        let mut buf = BytesMut::new();
        let mut head = BucketHead::request(1, MAX_PACKET_SIZE + 1);
        head.signature = 0;
        head.protocol_version = 9;
        head.write(&mut buf);
        assert!(matches!(
            BucketCodec::new().decode(&mut buf),
            Err(LevinError::BadSignature { .. })
        ));
    }
}

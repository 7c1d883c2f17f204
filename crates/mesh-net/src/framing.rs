//! Wire framing for the §6 message set.
//!
//! Wire format: a 4-byte big-endian length prefix (covering the type byte
//! and payload), a 1-byte type tag, and the payload — canonical JSON bytes
//! produced by `mesh_core::canonical`, not a binary encoding.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
    #[error("unknown frame type: {0}")]
    UnknownType(u8),
}

/// Tag identifying the payload's wire message type (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    TokenEnvelope = 0,
    TaskRequest = 1,
    Offer = 2,
    Assignment = 3,
    CancelAssignment = 4,
    Receipt = 5,
    Endorsement = 6,
    Revocation = 7,
    ServiceAnnouncement = 8,
    ServiceQuery = 9,
    ServiceOffer = 10,
    FileQuery = 11,
    FileOffer = 12,
    StorageUpload = 13,
    StorageInventoryQuery = 14,
    StorageInventoryResponse = 15,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use FrameType::*;
        Ok(match value {
            0 => TokenEnvelope,
            1 => TaskRequest,
            2 => Offer,
            3 => Assignment,
            4 => CancelAssignment,
            5 => Receipt,
            6 => Endorsement,
            7 => Revocation,
            8 => ServiceAnnouncement,
            9 => ServiceQuery,
            10 => ServiceOffer,
            11 => FileQuery,
            12 => FileOffer,
            13 => StorageUpload,
            14 => StorageInventoryQuery,
            15 => StorageInventoryResponse,
            other => return Err(FrameError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self { frame_type, payload }
    }
}

#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = 1 + frame.payload.len();
        if body_len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(body_len));
        }
        dst.reserve(4 + body_len);
        dst.put_u32(body_len as u32);
        dst.put_u8(frame.frame_type as u8);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if body_len == 0 {
            return Err(FrameError::UnknownType(0));
        }
        if body_len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(body_len));
        }
        if src.len() < 4 + body_len {
            src.reserve(4 + body_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let type_byte = src.get_u8();
        let frame_type = FrameType::try_from(type_byte)?;
        let payload = src.split_to(body_len - 1).to_vec();

        Ok(Some(Frame::new(frame_type, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        let frame = Frame::new(FrameType::TaskRequest, br#"{"a":1}"#.to_vec());
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.frame_type, FrameType::TaskRequest);
        assert_eq!(decoded.payload, frame.payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        let frame = Frame::new(FrameType::Offer, vec![1, 2, 3, 4, 5]);
        codec.encode(frame, &mut buf).unwrap();

        let mut partial = buf.split_to(3);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn unknown_type_byte_errors() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_u8(255);
        buf.put_u8(0);
        assert!(codec.decode(&mut buf).is_err());
    }
}

//! Access-unit framing for the streaming phase.
//!
//! ## Wire format
//!
//! ```text
//! timestamp_us: i64 big-endian (8)
//! length:       i32 big-endian (4)
//! payload:      [u8; length]
//! ```
//!
//! No padding, no checksum and no end marker: the stream ends when the
//! connection closes. Encoder flags are not carried, so decoded units
//! always have empty [`BufferFlags`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MirrorError;
use crate::types::{AccessUnit, BufferFlags};

/// Size of the fixed header preceding every payload.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Largest payload the decoder accepts. The encoder side is only bound by
/// the signed 32-bit length field.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Encodes [`AccessUnit`]s onto the wire and decodes them back.
#[derive(Debug, Clone, Copy)]
pub struct AccessUnitCodec {
    max_payload: usize,
}

impl AccessUnitCodec {
    pub fn new() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    /// Override the decoder's payload limit.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for AccessUnitCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<AccessUnit> for AccessUnitCodec {
    type Error = MirrorError;

    fn encode(&mut self, item: AccessUnit, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = i32::try_from(item.payload.len()).map_err(|_| MirrorError::FrameTooLarge {
            size: item.payload.len(),
            max: i32::MAX as usize,
        })?;

        dst.reserve(FRAME_HEADER_SIZE + item.payload.len());
        dst.put_i64(item.timestamp_us);
        dst.put_i32(len);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for AccessUnitCodec {
    type Item = AccessUnit;
    type Error = MirrorError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &src[..FRAME_HEADER_SIZE];
        let timestamp_us = header.get_i64();
        let len = header.get_i32();

        let len = usize::try_from(len).map_err(|_| MirrorError::InvalidFrame("negative length"))?;
        if len > self.max_payload {
            return Err(MirrorError::FrameTooLarge {
                size: len,
                max: self.max_payload,
            });
        }

        if src.len() < FRAME_HEADER_SIZE + len {
            src.reserve(FRAME_HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        let payload = src.split_to(len).freeze();

        Ok(Some(AccessUnit {
            timestamp_us,
            payload,
            flags: BufferFlags::empty(),
        }))
    }
}

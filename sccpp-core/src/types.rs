//! Shared types for the capture → encode → stream pipeline.
//!
//! [`AccessUnit`] is the only thing that crosses from the encoder side to
//! the socket side. It owns its payload as [`Bytes`] so the single copy
//! out of the encoder's output buffer is also the last one.

use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;

use crate::error::MirrorError;

// ── BufferFlags ──────────────────────────────────────────────────

bitflags! {
    /// Per-buffer flags reported by the encoder alongside each output.
    ///
    /// None of these travel on the wire; they steer the streamer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// The unit is an IDR / sync picture.
        const KEY_FRAME = 0x1;
        /// The unit carries codec configuration (SPS/PPS) rather than a picture.
        const CODEC_CONFIG = 0x2;
        /// The encoder will produce no further output.
        const END_OF_STREAM = 0x4;
    }
}

// ── AccessUnit ───────────────────────────────────────────────────

/// One timestamped unit of compressed video output.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Monotonic capture time in microseconds (not wall-clock).
    pub timestamp_us: i64,
    /// Start-code-delimited NAL units.
    pub payload: Bytes,
    /// Encoder flags for this unit.
    pub flags: BufferFlags,
}

impl AccessUnit {
    pub fn new(timestamp_us: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp_us,
            payload: payload.into(),
            flags: BufferFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = flags;
        self
    }

    /// An empty unit that only signals end-of-stream.
    pub fn end_of_stream(timestamp_us: i64) -> Self {
        Self::new(timestamp_us, Bytes::new()).with_flags(BufferFlags::END_OF_STREAM)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }
}

// Payload bytes are never printed.
impl fmt::Debug for AccessUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessUnit")
            .field("timestamp_us", &self.timestamp_us)
            .field("len", &self.payload.len())
            .field("flags", &self.flags)
            .finish()
    }
}

// ── Dimensions ───────────────────────────────────────────────────

/// Width × height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round both axes up to the next multiple of `alignment`.
    ///
    /// Returns `None` for a zero axis, a zero alignment, or on overflow.
    pub fn align_up(self, alignment: u32) -> Option<Self> {
        if self.width == 0 || self.height == 0 || alignment == 0 {
            return None;
        }
        Some(Self {
            width: self.width.checked_next_multiple_of(alignment)?,
            height: self.height.checked_next_multiple_of(alignment)?,
        })
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Geometry of the display being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayInfo {
    pub size: Dimensions,
    pub dpi: u32,
}

// ── AuthorizationToken ───────────────────────────────────────────

/// Opaque proof that screen capture was granted.
///
/// Produced by the external permission flow; the core only hands it to
/// the capture backend when a session starts.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationToken {
    token: Bytes,
    data: Bytes,
}

impl AuthorizationToken {
    pub fn new(token: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            token: token.into(),
            data: data.into(),
        }
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// The data blob delivered with the grant.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for AuthorizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthorizationToken(..)")
    }
}

// ── DeviceDescriptor ─────────────────────────────────────────────

/// Short UTF-8 identity sent once per session after the magic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor(String);

impl DeviceDescriptor {
    /// Longest descriptor the agent will send, terminator excluded.
    pub const MAX_LEN: usize = 255;

    pub fn new(name: impl Into<String>) -> Result<Self, MirrorError> {
        let name = name.into();
        if name.is_empty() {
            return Err(MirrorError::InvalidDescriptor("empty"));
        }
        if name.len() > Self::MAX_LEN {
            return Err(MirrorError::InvalidDescriptor("longer than 255 bytes"));
        }
        if name.as_bytes().contains(&0) {
            return Err(MirrorError::InvalidDescriptor("contains a NUL byte"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

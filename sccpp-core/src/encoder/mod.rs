//! Capture and encoder capability.
//!
//! The pixel capture mechanism and the video encoder live outside this
//! crate. They are reached through three traits:
//!
//! | Trait            | Role                                                   |
//! |------------------|--------------------------------------------------------|
//! | [`CaptureBackend`] | Factory: display geometry, encoders, frame sources   |
//! | [`VideoEncoder`]   | Configure / start / dequeue output buffers / release |
//! | [`FrameSource`]    | Feeds the display into the encoder's input surface   |
//!
//! [`CaptureEncoder`] is the shim the session pipeline talks to: it picks
//! the format, brings the pair up, and turns output buffers into
//! [`AccessUnit`](crate::types::AccessUnit)s.

pub mod shim;
pub mod synthetic;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EncoderError;
use crate::types::{AuthorizationToken, BufferFlags, Dimensions, DisplayInfo};

pub use shim::{CaptureEncoder, EncoderHandle, NextUnit};
pub use synthetic::{SyntheticBackend, SyntheticConfig};

/// MIME type of the H.264 / AVC elementary stream.
pub const MIME_AVC: &str = "video/avc";

// ── Format parameters ────────────────────────────────────────────

/// H.264 profile. Discriminants follow the platform codec constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvcProfile {
    Baseline = 0x01,
    Main = 0x02,
    High = 0x08,
}

/// H.264 level. Discriminants follow the platform codec constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvcLevel {
    #[serde(rename = "3.0")]
    Level3 = 0x100,
    #[serde(rename = "3.1")]
    Level31 = 0x200,
    #[serde(rename = "3.2")]
    Level32 = 0x400,
    #[serde(rename = "4.0")]
    Level4 = 0x800,
    #[serde(rename = "4.1")]
    Level41 = 0x1000,
    #[serde(rename = "4.2")]
    Level42 = 0x2000,
    #[serde(rename = "5.0")]
    Level5 = 0x4000,
    #[serde(rename = "5.1")]
    Level51 = 0x8000,
}

/// Rate-control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    Cq = 0,
    Vbr = 1,
    Cbr = 2,
}

/// Input color format of the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    /// Frames arrive through an input surface, not as CPU buffers.
    Surface = 0x7F00_0789,
    Yuv420Flexible = 0x7F42_0888,
}

// ── EncoderConfig ────────────────────────────────────────────────

/// Fixed encoder initialisation parameters.
///
/// The defaults are what some hardware encoders (notably Exynos H.264)
/// require to accept a surface-input configuration at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Codec MIME type.
    pub mime: String,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Target frames per second.
    pub frame_rate: u32,
    /// Seconds between key frames.
    pub i_frame_interval_secs: u32,
    /// H.264 profile.
    pub profile: AvcProfile,
    /// H.264 level.
    pub level: AvcLevel,
    /// Rate-control mode.
    pub bitrate_mode: BitrateMode,
    /// Both capture axes are rounded up to a multiple of this.
    pub alignment: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            mime: MIME_AVC.into(),
            bitrate: 4_000_000,
            frame_rate: 30,
            i_frame_interval_secs: 1,
            profile: AvcProfile::Baseline,
            level: AvcLevel::Level31,
            bitrate_mode: BitrateMode::Cbr,
            alignment: 16,
        }
    }
}

/// The full format handed to [`VideoEncoder::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormat {
    pub mime: String,
    pub size: Dimensions,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub i_frame_interval_secs: u32,
    pub color_format: ColorFormat,
    pub profile: AvcProfile,
    pub level: AvcLevel,
    pub bitrate_mode: BitrateMode,
}

// ── Capabilities ─────────────────────────────────────────────────

/// One supported profile/level pair, as raw codec constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileLevel {
    pub profile: u32,
    pub level: u32,
}

/// What an encoder reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderCapabilities {
    pub name: String,
    pub mime: String,
    pub profile_levels: Vec<ProfileLevel>,
    pub color_formats: Vec<u32>,
}

// ── Encoder output ───────────────────────────────────────────────

/// Opaque handle to the surface an encoder consumes frames from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSurface {
    pub id: u64,
    pub size: Dimensions,
}

/// Metadata of one dequeued output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Slot to pass to [`VideoEncoder::output_buffer`].
    pub index: usize,
    /// Start of valid data inside the buffer.
    pub offset: usize,
    /// Length of valid data.
    pub size: usize,
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

/// Result of one bounded wait on the encoder's output queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    /// An output buffer is ready; it must be released after reading.
    Buffer(BufferInfo),
    /// Nothing arrived within the timeout.
    TryAgainLater,
    /// The output format changed; no data this round.
    FormatChanged(Dimensions),
}

// ── Traits ───────────────────────────────────────────────────────

/// A hardware or software video encoder with surface input.
///
/// `dequeue_output` must be cancel-safe: dropping the future before it
/// resolves must not lose an output buffer.
#[async_trait]
pub trait VideoEncoder: Send {
    fn name(&self) -> &str;

    fn capabilities(&self) -> EncoderCapabilities;

    /// Apply `format`. Rejected parameters yield [`EncoderError::Configure`].
    fn configure(&mut self, format: &VideoFormat) -> Result<(), EncoderError>;

    fn create_input_surface(&mut self) -> Result<InputSurface, EncoderError>;

    fn start(&mut self) -> Result<(), EncoderError>;

    /// Wait at most `timeout` for the next output buffer.
    async fn dequeue_output(&mut self, timeout: Duration) -> Result<Dequeued, EncoderError>;

    /// Borrow the bytes of a dequeued buffer.
    fn output_buffer(&self, index: usize) -> Option<&[u8]>;

    /// Hand a dequeued buffer back to the encoder.
    fn release_output_buffer(&mut self, index: usize) -> Result<(), EncoderError>;

    async fn stop(&mut self) -> Result<(), EncoderError>;

    /// Free all encoder resources. Called exactly once per encoder.
    fn release(&mut self);
}

/// The continuous visual feed. The core only attaches and detaches it.
#[async_trait]
pub trait FrameSource: Send {
    /// Start feeding `display` into `surface`.
    ///
    /// Implementations may hop to a privileged execution context; the
    /// returned future resolves once the feed is live.
    async fn attach(
        &mut self,
        surface: InputSurface,
        display: DisplayInfo,
    ) -> Result<(), EncoderError>;

    async fn detach(&mut self) -> Result<(), EncoderError>;
}

/// Factory for the platform capture pair.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Geometry of the display to capture.
    fn display(&self) -> Result<DisplayInfo, EncoderError>;

    fn create_encoder(&self, mime: &str) -> Result<Box<dyn VideoEncoder>, EncoderError>;

    /// A frame source bound to a capture authorization.
    fn create_frame_source(
        &self,
        token: &AuthorizationToken,
    ) -> Result<Box<dyn FrameSource>, EncoderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_surface_encoder_requirements() {
        let cfg = EncoderConfig::default();
        assert_eq!(cfg.mime, "video/avc");
        assert_eq!(cfg.bitrate, 4_000_000);
        assert_eq!(cfg.frame_rate, 30);
        assert_eq!(cfg.i_frame_interval_secs, 1);
        assert_eq!(cfg.profile, AvcProfile::Baseline);
        assert_eq!(cfg.level, AvcLevel::Level31);
        assert_eq!(cfg.bitrate_mode, BitrateMode::Cbr);
        assert_eq!(cfg.alignment, 16);
    }

    #[test]
    fn codec_constants() {
        assert_eq!(AvcProfile::Baseline as u32, 1);
        assert_eq!(AvcLevel::Level31 as u32, 0x200);
        assert_eq!(BitrateMode::Cbr as u32, 2);
        assert_eq!(ColorFormat::Surface as u32, 0x7F00_0789);
    }
}

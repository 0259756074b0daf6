//! Synthetic capture backend.
//!
//! Emits a fixed, decodable 2×2 blue H.264 picture (SPS + PPS + SEI + IDR,
//! all-intra, keyint 1) on a steady clock. Used where no platform encoder
//! exists and to exercise the full pipeline end to end. Timestamps are
//! `n × frame_interval`, starting at zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use crate::encoder::{
    AvcLevel, AvcProfile, BufferInfo, CaptureBackend, ColorFormat, Dequeued, EncoderCapabilities,
    FrameSource, InputSurface, MIME_AVC, ProfileLevel, VideoEncoder, VideoFormat,
};
use crate::error::EncoderError;
use crate::types::{AuthorizationToken, BufferFlags, Dimensions, DisplayInfo};

/// One complete access unit: a 2×2 blue IDR picture with its parameter sets.
pub static BLUE_IDR_2X2: &[u8] = include_bytes!("blue_2x2.h264");

const ENCODER_NAME: &str = "sccpp.synthetic.avc";

// ── SyntheticConfig ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Geometry reported as the captured display.
    pub display: DisplayInfo,
    /// Time between emitted pictures.
    pub frame_interval: Duration,
    /// Emit end-of-stream after this many pictures.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            display: DisplayInfo {
                size: Dimensions::new(1080, 2340),
                dpi: 420,
            },
            frame_interval: Duration::from_millis(40),
            frame_limit: None,
        }
    }
}

// ── SyntheticBackend ─────────────────────────────────────────────

pub struct SyntheticBackend {
    config: SyntheticConfig,
    next_surface: AtomicU64,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            next_surface: AtomicU64::new(1),
        }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn display(&self) -> Result<DisplayInfo, EncoderError> {
        Ok(self.config.display)
    }

    fn create_encoder(&self, mime: &str) -> Result<Box<dyn VideoEncoder>, EncoderError> {
        if mime != MIME_AVC {
            return Err(EncoderError::Unsupported(format!("no encoder for {mime}")));
        }
        Ok(Box::new(SyntheticEncoder {
            phase: Phase::Created,
            surface_id: self.next_surface.fetch_add(1, Ordering::Relaxed),
            format: None,
            frame_interval: self.config.frame_interval,
            frame_limit: self.config.frame_limit,
            origin: None,
            emitted: 0,
            end_sent: false,
            in_flight: None,
        }))
    }

    fn create_frame_source(
        &self,
        _token: &AuthorizationToken,
    ) -> Result<Box<dyn FrameSource>, EncoderError> {
        Ok(Box::new(SyntheticFrameSource { surface: None }))
    }
}

// ── SyntheticEncoder ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Configured,
    Running,
    Stopped,
    Released,
}

struct SyntheticEncoder {
    phase: Phase,
    surface_id: u64,
    format: Option<VideoFormat>,
    frame_interval: Duration,
    frame_limit: Option<u64>,
    origin: Option<Instant>,
    emitted: u64,
    end_sent: bool,
    /// The single output slot (index 0).
    in_flight: Option<Bytes>,
}

impl SyntheticEncoder {
    fn timestamp_us(&self, frame: u64) -> i64 {
        let interval = self.frame_interval.as_micros() as i64;
        interval.saturating_mul(frame as i64)
    }
}

#[async_trait]
impl VideoEncoder for SyntheticEncoder {
    fn name(&self) -> &str {
        ENCODER_NAME
    }

    fn capabilities(&self) -> EncoderCapabilities {
        EncoderCapabilities {
            name: ENCODER_NAME.into(),
            mime: MIME_AVC.into(),
            profile_levels: vec![ProfileLevel {
                profile: AvcProfile::Baseline as u32,
                level: AvcLevel::Level31 as u32,
            }],
            color_formats: vec![
                ColorFormat::Surface as u32,
                ColorFormat::Yuv420Flexible as u32,
            ],
        }
    }

    fn configure(&mut self, format: &VideoFormat) -> Result<(), EncoderError> {
        if self.phase != Phase::Created {
            return Err(EncoderError::Configure("already configured".into()));
        }
        if format.bitrate == 0 || format.frame_rate == 0 {
            return Err(EncoderError::Configure(
                "bitrate and frame rate must be non-zero".into(),
            ));
        }
        if format.color_format != ColorFormat::Surface {
            return Err(EncoderError::Configure("only surface input is supported".into()));
        }
        self.format = Some(format.clone());
        self.phase = Phase::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, EncoderError> {
        let format = self
            .format
            .as_ref()
            .ok_or_else(|| EncoderError::Runtime("input surface before configure".into()))?;
        Ok(InputSurface {
            id: self.surface_id,
            size: format.size,
        })
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        if self.phase != Phase::Configured {
            return Err(EncoderError::Runtime("start before configure".into()));
        }
        self.origin = Some(Instant::now());
        self.phase = Phase::Running;
        Ok(())
    }

    async fn dequeue_output(&mut self, timeout: Duration) -> Result<Dequeued, EncoderError> {
        let origin = match (self.phase, self.origin) {
            (Phase::Running, Some(origin)) => origin,
            _ => return Err(EncoderError::Runtime("encoder is not running".into())),
        };
        if self.in_flight.is_some() {
            return Err(EncoderError::Runtime("output buffer 0 not released".into()));
        }

        if self.end_sent {
            tokio::time::sleep(timeout).await;
            return Ok(Dequeued::TryAgainLater);
        }

        if self.frame_limit.is_some_and(|limit| self.emitted >= limit) {
            self.end_sent = true;
            self.in_flight = Some(Bytes::new());
            return Ok(Dequeued::Buffer(BufferInfo {
                index: 0,
                offset: 0,
                size: 0,
                presentation_time_us: self.timestamp_us(self.emitted),
                flags: BufferFlags::END_OF_STREAM,
            }));
        }

        let offset_us = u64::try_from(self.timestamp_us(self.emitted)).unwrap_or(u64::MAX);
        let due = origin + Duration::from_micros(offset_us);
        if due > Instant::now() + timeout {
            tokio::time::sleep(timeout).await;
            return Ok(Dequeued::TryAgainLater);
        }
        tokio::time::sleep_until(due).await;

        let presentation_time_us = self.timestamp_us(self.emitted);
        self.emitted += 1;
        self.in_flight = Some(Bytes::from_static(BLUE_IDR_2X2));
        Ok(Dequeued::Buffer(BufferInfo {
            index: 0,
            offset: 0,
            size: BLUE_IDR_2X2.len(),
            presentation_time_us,
            flags: BufferFlags::KEY_FRAME,
        }))
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        match index {
            0 => self.in_flight.as_deref(),
            _ => None,
        }
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<(), EncoderError> {
        match (index, self.in_flight.take()) {
            (0, Some(_)) => Ok(()),
            _ => Err(EncoderError::Runtime(format!(
                "output buffer {index} is not dequeued"
            ))),
        }
    }

    async fn stop(&mut self) -> Result<(), EncoderError> {
        if self.phase == Phase::Running {
            self.phase = Phase::Stopped;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.in_flight = None;
        self.phase = Phase::Released;
    }
}

// ── SyntheticFrameSource ─────────────────────────────────────────

struct SyntheticFrameSource {
    surface: Option<InputSurface>,
}

#[async_trait]
impl FrameSource for SyntheticFrameSource {
    async fn attach(
        &mut self,
        surface: InputSurface,
        info: DisplayInfo,
    ) -> Result<(), EncoderError> {
        if self.surface.is_some() {
            return Err(EncoderError::Attach("already attached".into()));
        }
        debug!(
            surface = surface.id,
            size = %info.size,
            dpi = info.dpi,
            "synthetic display attached"
        );
        self.surface = Some(surface);
        Ok(())
    }

    async fn detach(&mut self) -> Result<(), EncoderError> {
        if let Some(surface) = self.surface.take() {
            debug!(surface = surface.id, "synthetic display detached");
        }
        Ok(())
    }
}

//! Encoder adaptation shim.
//!
//! [`CaptureEncoder::start`] brings up one encoder + frame source pair for
//! a session; [`EncoderHandle`] owns that pair until
//! [`release`](EncoderHandle::release).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::encoder::{
    BufferInfo, CaptureBackend, ColorFormat, Dequeued, EncoderCapabilities, EncoderConfig,
    FrameSource, VideoEncoder, VideoFormat,
};
use crate::error::EncoderError;
use crate::types::{AccessUnit, AuthorizationToken, Dimensions, DisplayInfo};

/// Default deadline for attaching the capture surface.
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(2);

// ── NextUnit ─────────────────────────────────────────────────────

/// Outcome of one bounded poll of the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextUnit {
    Ready(AccessUnit),
    Pending,
}

// ── CaptureEncoder ───────────────────────────────────────────────

/// Starts encoder sessions from a backend and a fixed configuration.
#[derive(Clone)]
pub struct CaptureEncoder {
    backend: Arc<dyn CaptureBackend>,
    config: EncoderConfig,
    attach_timeout: Duration,
}

impl CaptureEncoder {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: EncoderConfig) -> Self {
        Self {
            backend,
            config,
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
        }
    }

    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Build the encoder format for a display of `display` pixels.
    pub fn video_format(&self, display: Dimensions) -> Result<VideoFormat, EncoderError> {
        let size = display.align_up(self.config.alignment).ok_or_else(|| {
            EncoderError::Configure(format!(
                "cannot align {display} to a multiple of {}",
                self.config.alignment
            ))
        })?;

        Ok(VideoFormat {
            mime: self.config.mime.clone(),
            size,
            bitrate: self.config.bitrate,
            frame_rate: self.config.frame_rate,
            i_frame_interval_secs: self.config.i_frame_interval_secs,
            color_format: ColorFormat::Surface,
            profile: self.config.profile,
            level: self.config.level,
            bitrate_mode: self.config.bitrate_mode,
        })
    }

    /// Create a throwaway encoder, read its capabilities, release it.
    pub fn probe_capabilities(&self) -> Result<EncoderCapabilities, EncoderError> {
        let mut encoder = self.backend.create_encoder(&self.config.mime)?;
        let caps = encoder.capabilities();
        encoder.release();
        Ok(caps)
    }

    /// Bring up an encoder and attach the display to it.
    ///
    /// On failure everything acquired so far is released before the
    /// error is returned.
    pub async fn start(&self, token: &AuthorizationToken) -> Result<EncoderHandle, EncoderError> {
        let display = self.backend.display()?;
        let format = self.video_format(display.size)?;
        let encoder = self.backend.create_encoder(&format.mime)?;

        let mut handle = EncoderHandle {
            encoder,
            source: None,
            format,
            started: false,
            attached: false,
            released: false,
        };

        if let Err(e) = self.bring_up(&mut handle, display, token).await {
            handle.release(self.attach_timeout).await;
            return Err(e);
        }

        debug!(
            backend = self.backend.name(),
            encoder = handle.encoder.name(),
            size = %handle.format.size,
            "encoder and capture surface started"
        );
        Ok(handle)
    }

    async fn bring_up(
        &self,
        handle: &mut EncoderHandle,
        display: DisplayInfo,
        token: &AuthorizationToken,
    ) -> Result<(), EncoderError> {
        handle.encoder.configure(&handle.format)?;
        let surface = handle.encoder.create_input_surface()?;
        handle.encoder.start()?;
        handle.started = true;

        let source = handle.source.insert(self.backend.create_frame_source(token)?);
        let display = DisplayInfo {
            size: handle.format.size,
            dpi: display.dpi,
        };
        match tokio::time::timeout(self.attach_timeout, source.attach(surface, display)).await {
            Err(_) => Err(EncoderError::Timeout(self.attach_timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                handle.attached = true;
                Ok(())
            }
        }
    }
}

// ── EncoderHandle ────────────────────────────────────────────────

/// A running encoder + frame source, exclusively owned by one session.
pub struct EncoderHandle {
    encoder: Box<dyn VideoEncoder>,
    source: Option<Box<dyn FrameSource>>,
    format: VideoFormat,
    started: bool,
    attached: bool,
    released: bool,
}

impl EncoderHandle {
    /// The format the encoder was configured with.
    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Wait at most `timeout` for the next access unit.
    ///
    /// Cancel-safe as long as the underlying encoder's dequeue is.
    pub async fn next_access_unit(&mut self, timeout: Duration) -> Result<NextUnit, EncoderError> {
        if self.released {
            return Err(EncoderError::Released);
        }

        match self.encoder.dequeue_output(timeout).await? {
            Dequeued::TryAgainLater => Ok(NextUnit::Pending),
            Dequeued::FormatChanged(size) => {
                debug!(%size, "encoder output format changed");
                Ok(NextUnit::Pending)
            }
            Dequeued::Buffer(info) => {
                let unit = self.copy_out(&info);
                // The buffer goes back even if the copy failed.
                let returned = self.encoder.release_output_buffer(info.index);
                let unit = unit?;
                returned?;
                Ok(NextUnit::Ready(unit))
            }
        }
    }

    fn copy_out(&self, info: &BufferInfo) -> Result<AccessUnit, EncoderError> {
        let buf = self.encoder.output_buffer(info.index).ok_or_else(|| {
            EncoderError::Runtime(format!("no output buffer at index {}", info.index))
        })?;
        let end = info
            .offset
            .checked_add(info.size)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                EncoderError::Runtime(format!(
                    "buffer {} range {}+{} exceeds {} bytes",
                    info.index,
                    info.offset,
                    info.size,
                    buf.len()
                ))
            })?;

        Ok(AccessUnit {
            timestamp_us: info.presentation_time_us,
            payload: Bytes::copy_from_slice(&buf[info.offset..end]),
            flags: info.flags,
        })
    }

    /// Detach the source, stop and release the encoder.
    ///
    /// Idempotent. Each step gets at most `budget`; failures are logged.
    pub async fn release(&mut self, budget: Duration) {
        if self.released {
            return;
        }
        self.released = true;

        if self.attached {
            if let Some(source) = self.source.as_mut() {
                match tokio::time::timeout(budget, source.detach()).await {
                    Err(_) => warn!(phase = "teardown", "frame source detach timed out"),
                    Ok(Err(e)) => warn!(phase = "teardown", "frame source detach failed: {e}"),
                    Ok(Ok(())) => {}
                }
            }
        }

        if self.started {
            match tokio::time::timeout(budget, self.encoder.stop()).await {
                Err(_) => warn!(phase = "teardown", "encoder stop timed out"),
                Ok(Err(e)) => warn!(phase = "teardown", "encoder stop failed: {e}"),
                Ok(Ok(())) => {}
            }
        }

        self.encoder.release();
        debug!(encoder = self.encoder.name(), "encoder released");
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!("encoder handle dropped without release");
            self.released = true;
            self.encoder.release();
        }
    }
}

//! Frame streamer: drains encoder output onto the connection.
//!
//! Every access unit is written as one frame (see [`crate::codec`]) and
//! flushed before the next one is pulled, so a stalled or vanished client
//! shows up on the very next write. Order on the wire is the encoder's
//! emission order; nothing is dropped or merged.

use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{AccessUnitCodec, FRAME_HEADER_SIZE};
use crate::encoder::{EncoderHandle, NextUnit};
use crate::error::EncoderError;

/// Default bounded wait on the encoder per poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default deadline for one frame write + flush.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// ── SessionEnd ───────────────────────────────────────────────────

/// Why a streaming loop stopped.
#[derive(Debug, Clone)]
pub enum SessionEnd {
    /// The client closed the connection, a write failed, or a write stalled.
    ClientGone,
    /// The encoder signalled end-of-stream.
    EndOfStream,
    /// A stop or revoke signal arrived.
    Stopped,
    /// The encoder failed mid-stream.
    EncoderFailed(EncoderError),
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientGone => write!(f, "client gone"),
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Stopped => write!(f, "stopped"),
            Self::EncoderFailed(e) => write!(f, "encoder failed: {e}"),
        }
    }
}

/// What one streaming loop achieved.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Frames fully written and flushed.
    pub frames: u64,
    /// Bytes on the wire, headers included.
    pub bytes: u64,
    pub end: SessionEnd,
}

// ── FrameStreamer ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FrameStreamer {
    poll_interval: Duration,
    write_timeout: Duration,
}

impl Default for FrameStreamer {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_WRITE_TIMEOUT)
    }
}

impl FrameStreamer {
    pub fn new(poll_interval: Duration, write_timeout: Duration) -> Self {
        Self {
            poll_interval,
            write_timeout,
        }
    }

    /// Pump `encoder` into `writer` until the client leaves, the encoder
    /// ends or fails, or `cancel` fires.
    ///
    /// `reader` is the other half of the same connection. The client is not
    /// expected to send anything; stray bytes are discarded. EOF only means
    /// the client half-closed, so the reader is dropped from the poll and a
    /// real disconnect surfaces on the next write.
    pub async fn run<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        encoder: &mut EncoderHandle,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut sink = FramedWrite::new(writer, AccessUnitCodec::new());
        let mut scratch = [0u8; 256];
        let mut frames = 0u64;
        let mut bytes = 0u64;
        let mut reader_done = false;

        let end = loop {
            let unit = tokio::select! {
                biased;

                _ = cancel.cancelled() => break SessionEnd::Stopped,

                read = reader.read(&mut scratch), if !reader_done => match read {
                    Ok(0) => {
                        debug!(phase = "streaming", "client half-closed the connection");
                        reader_done = true;
                        continue;
                    }
                    Ok(n) => {
                        trace!(n, "discarding bytes sent by client");
                        continue;
                    }
                    Err(e) => {
                        debug!(phase = "streaming", "client read failed: {e}");
                        break SessionEnd::ClientGone;
                    }
                },

                next = encoder.next_access_unit(self.poll_interval) => match next {
                    Ok(NextUnit::Ready(unit)) => unit,
                    Ok(NextUnit::Pending) => continue,
                    Err(e) => {
                        warn!(phase = "streaming", "encoder failed: {e}");
                        break SessionEnd::EncoderFailed(e);
                    }
                },
            };

            let end_of_stream = unit.is_end_of_stream();
            if !unit.payload.is_empty() || !end_of_stream {
                let len = unit.payload.len();
                let timestamp_us = unit.timestamp_us;
                let sent = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break SessionEnd::Stopped,

                    sent = tokio::time::timeout(self.write_timeout, sink.send(unit)) => sent,
                };
                match sent {
                    Ok(Ok(())) => {
                        frames += 1;
                        bytes += (FRAME_HEADER_SIZE + len) as u64;
                        trace!(timestamp_us, len, "frame sent");
                    }
                    Ok(Err(e)) => {
                        debug!(phase = "streaming", "frame write failed: {e}");
                        break SessionEnd::ClientGone;
                    }
                    Err(_) => {
                        warn!(
                            phase = "streaming",
                            "client stalled for {:?}; dropping it", self.write_timeout
                        );
                        break SessionEnd::ClientGone;
                    }
                }
            }

            if end_of_stream {
                debug!(phase = "streaming", "encoder reached end of stream");
                break SessionEnd::EndOfStream;
            }
        };

        StreamOutcome { frames, bytes, end }
    }
}

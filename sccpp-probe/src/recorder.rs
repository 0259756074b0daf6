//! Stream recorder.
//!
//! Appends every received payload to an Annex-B sink (playable with any
//! raw H.264 player) and keeps running statistics.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sccpp_core::{AccessUnit, MirrorClient, MirrorError};

/// NAL unit type of an IDR slice.
const NAL_IDR: u8 = 5;
/// NAL unit type of a sequence parameter set.
const NAL_SPS: u8 = 7;

// ── RecordStats ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub frames: u64,
    /// Payload bytes, headers excluded.
    pub bytes: u64,
    /// Frames containing an IDR slice.
    pub key_frames: u64,
    /// Frames containing a sequence parameter set.
    pub config_frames: u64,
    pub first_timestamp_us: Option<i64>,
    pub last_timestamp_us: Option<i64>,
}

impl RecordStats {
    fn observe(&mut self, unit: &AccessUnit) {
        self.frames += 1;
        self.bytes += unit.payload.len() as u64;
        let types: Vec<u8> = nal_unit_types(&unit.payload).collect();
        if types.contains(&NAL_IDR) {
            self.key_frames += 1;
        }
        if types.contains(&NAL_SPS) {
            self.config_frames += 1;
        }
        self.first_timestamp_us.get_or_insert(unit.timestamp_us);
        self.last_timestamp_us = Some(unit.timestamp_us);
    }

    /// Span between the first and last timestamp.
    pub fn span_us(&self) -> i64 {
        match (self.first_timestamp_us, self.last_timestamp_us) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        }
    }

    /// Average frame rate over the recorded span.
    pub fn fps(&self) -> f64 {
        let span = self.span_us();
        if self.frames < 2 || span <= 0 {
            return 0.0;
        }
        (self.frames - 1) as f64 * 1_000_000.0 / span as f64
    }
}

impl fmt::Display for RecordStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} bytes, {} key frames, {:.1} fps",
            self.frames,
            self.bytes,
            self.key_frames,
            self.fps()
        )
    }
}

// ── Annex-B scanning ─────────────────────────────────────────────

/// NAL unit types of every NAL in an Annex-B buffer.
pub fn nal_unit_types(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    data.windows(4)
        .filter(|w| w[..3] == [0, 0, 1])
        .map(|w| w[3] & 0x1F)
}

// ── record ───────────────────────────────────────────────────────

/// Copy access units from `client` into `sink` until the agent closes the
/// stream, `max_frames` is reached or `cancel` fires.
pub async fn record<S, W>(
    client: &mut MirrorClient<S>,
    sink: &mut W,
    max_frames: Option<u64>,
    cancel: &CancellationToken,
) -> Result<RecordStats, MirrorError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = RecordStats::default();

    loop {
        if max_frames.is_some_and(|max| stats.frames >= max) {
            debug!("frame limit reached");
            break;
        }

        let unit = tokio::select! {
            _ = cancel.cancelled() => break,
            next = client.next_unit() => match next {
                Some(unit) => unit?,
                None => {
                    info!("agent closed the stream");
                    break;
                }
            },
        };

        debug!(
            timestamp_us = unit.timestamp_us,
            len = unit.payload.len(),
            "access unit"
        );
        sink.write_all(&unit.payload).await?;
        stats.observe(&unit);
    }

    sink.flush().await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use sccpp_core::encoder::synthetic::BLUE_IDR_2X2;

    fn frame(timestamp_us: i64, payload: &[u8]) -> Vec<u8> {
        let mut bytes = timestamp_us.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(payload.len() as i32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Play the agent side: check the magic, then write `body` and close.
    async fn fake_agent(mut agent: tokio::io::DuplexStream, body: Vec<u8>) {
        let mut magic = [0u8; 5];
        agent.read_exact(&mut magic).await.unwrap();
        assert_eq!(&magic, b"sccpp");
        agent.write_all(b"Probe Device\0").await.unwrap();
        agent.write_all(&body).await.unwrap();
        agent.shutdown().await.unwrap();
    }

    #[test]
    fn finds_nal_types_in_synthetic_picture() {
        let types: Vec<u8> = nal_unit_types(BLUE_IDR_2X2).collect();
        assert_eq!(types.first(), Some(&NAL_SPS));
        assert!(types.contains(&8));
        assert!(types.contains(&NAL_IDR));
    }

    #[test]
    fn fps_needs_two_frames() {
        let mut stats = RecordStats::default();
        stats.observe(&AccessUnit::new(0, &b"\x00\x00\x01\x65"[..]));
        assert_eq!(stats.fps(), 0.0);
        stats.observe(&AccessUnit::new(40_000, &b"\x00\x00\x01\x41"[..]));
        assert!((stats.fps() - 25.0).abs() < f64::EPSILON);
        assert_eq!(stats.key_frames, 1);
    }

    #[tokio::test]
    async fn records_payloads_until_agent_closes() {
        let (probe, agent) = tokio::io::duplex(64 * 1024);
        let body = [frame(0, BLUE_IDR_2X2), frame(40_000, BLUE_IDR_2X2)].concat();
        tokio::spawn(fake_agent(agent, body));

        let mut client = MirrorClient::handshake(probe, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(client.descriptor(), "Probe Device");

        let mut out = Vec::new();
        let stats = record(&mut client, &mut out, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.frames, 2);
        assert_eq!(stats.key_frames, 2);
        assert_eq!(stats.span_us(), 40_000);
        assert_eq!(out, [BLUE_IDR_2X2, BLUE_IDR_2X2].concat());
    }

    #[tokio::test]
    async fn stops_at_frame_limit() {
        let (probe, agent) = tokio::io::duplex(64 * 1024);
        let body = (0..5).flat_map(|i| frame(i * 1_000, b"\x00\x00\x01\x41ab")).collect();
        tokio::spawn(fake_agent(agent, body));

        let mut client = MirrorClient::handshake(probe, Duration::from_secs(1))
            .await
            .unwrap();
        let mut out = Vec::new();
        let stats = record(&mut client, &mut out, Some(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.last_timestamp_us, Some(2_000));
        assert_eq!(stats.key_frames, 0);
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (probe, agent) = tokio::io::duplex(1024);
        let mut body = frame(0, b"0123456789");
        body.truncate(body.len() - 4);
        tokio::spawn(fake_agent(agent, body));

        let mut client = MirrorClient::handshake(probe, Duration::from_secs(1))
            .await
            .unwrap();
        let mut out = Vec::new();
        assert!(
            record(&mut client, &mut out, None, &CancellationToken::new())
                .await
                .is_err()
        );
    }
}

//! Domain-specific error types for the mirroring pipeline.
//!
//! All fallible operations return `Result<T, MirrorError>` or one of the
//! narrower per-phase errors ([`HandshakeError`], [`EncoderError`]).
//! Everything below the session boundary is typed and recoverable; only
//! [`MirrorError::Bind`] is meant to reach `main`.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the agent.
#[derive(Debug, Error)]
pub enum MirrorError {
    // ── Listener Errors ──────────────────────────────────────────
    /// The listening endpoint could not be bound. Fatal to the agent.
    #[error("cannot bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// An endpoint string could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // ── Session Errors ───────────────────────────────────────────
    /// The connection failed the magic-token exchange.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// A second client arrived while a session was already active.
    #[error("rejected: another session is already streaming")]
    RejectedConcurrentSession,

    /// No capture authorization is held, so no session may stream.
    #[error("capture is not authorized")]
    Unauthorized,

    /// The encoder could not be configured or failed while running.
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// A state machine transition was attempted from the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// The device descriptor is not a valid wire identity.
    #[error("invalid device descriptor: {0}")]
    InvalidDescriptor(&'static str),

    // ── Connection Errors ────────────────────────────────────────
    /// The socket reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The receiving side of an internal channel was dropped.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Framing Errors ───────────────────────────────────────────
    /// An access unit does not fit the 32-bit signed length field.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A received frame header is malformed.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
}

// ── HandshakeError ────────────────────────────────────────────────

/// Failure of the per-connection magic exchange.
///
/// Always local to one connection; the caller closes it.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer sent five bytes that are not the expected magic.
    #[error("invalid magic bytes")]
    BadMagic,

    /// The peer closed or errored before sending the full magic.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// The peer did not send the magic within the deadline.
    #[error("no magic within {0:?}")]
    Timeout(Duration),

    /// The descriptor reply could not be written.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// The descriptor sent by the agent had no terminator within bounds.
    #[error("descriptor exceeds {0} bytes")]
    DescriptorTooLong(usize),

    /// The descriptor sent by the agent is not valid UTF-8.
    #[error("descriptor is not valid utf-8")]
    InvalidDescriptor,
}

// ── EncoderError ──────────────────────────────────────────────────

/// Typed error for the capture/encoder capability.
///
/// Ends the current session; never the agent.
#[derive(Debug, Clone, Error)]
pub enum EncoderError {
    /// The encoder rejected the requested format.
    #[error("configure failed: {0}")]
    Configure(String),

    /// No encoder or capture backend is available for the request.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The encoder failed after it was started.
    #[error("encoder failed: {0}")]
    Runtime(String),

    /// The capture surface could not be attached to the frame source.
    #[error("surface attach failed: {0}")]
    Attach(String),

    /// A bounded encoder operation did not finish in time.
    #[error("encoder timed out after {0:?}")]
    Timeout(Duration),

    /// The handle was already released.
    #[error("encoder already released")]
    Released,
}

impl MirrorError {
    /// Whether this error should stop the whole agent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MirrorError::Bind { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = MirrorError::Handshake(HandshakeError::BadMagic);
        assert!(e.to_string().contains("magic"));

        let e = MirrorError::FrameTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn only_bind_is_fatal() {
        let bind = MirrorError::Bind {
            endpoint: "abstract:sccpp".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(bind.is_fatal());
        assert!(bind.to_string().contains("abstract:sccpp"));

        assert!(!MirrorError::RejectedConcurrentSession.is_fatal());
        assert!(!MirrorError::Encoder(EncoderError::Configure("profile".into())).is_fatal());
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: MirrorError = io_err.into();
        assert!(matches!(e, MirrorError::Connection(_)));
    }

    #[test]
    fn from_encoder() {
        let e: MirrorError = EncoderError::Released.into();
        assert!(matches!(e, MirrorError::Encoder(EncoderError::Released)));
    }
}

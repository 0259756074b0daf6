//! # sccpp-core
//!
//! Session pipeline of the sccpp screen-mirroring agent.
//!
//! This crate contains:
//! - **Protocol**: the `sccpp` magic exchange and the NUL-terminated device descriptor
//! - **Codec**: `AccessUnitCodec` for timestamp + length framed access units via `tokio_util`
//! - **Encoder**: capture/encoder capability traits, the `CaptureEncoder` shim and a synthetic backend
//! - **Session**: the single-slot state machine and `SessionManager`
//! - **Streamer**: `FrameStreamer`, pumping encoder output onto a connection
//! - **Listener**: `ConnectionListener` over abstract, filesystem or TCP sockets
//! - **Lifecycle**: `LifecycleController` mapping grant / revoke / stop signals onto the session
//! - **Client**: `MirrorClient`, the host end of the protocol
//! - **Error**: `MirrorError`, typed `thiserror`-based error hierarchy

pub mod client;
pub mod codec;
pub mod encoder;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod protocol;
pub mod session;
pub mod streamer;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::MirrorClient;
pub use codec::{AccessUnitCodec, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use encoder::{
    CaptureBackend, CaptureEncoder, EncoderCapabilities, EncoderConfig, EncoderHandle,
    FrameSource, NextUnit, SyntheticBackend, SyntheticConfig, VideoEncoder,
};
pub use error::{EncoderError, HandshakeError, MirrorError};
pub use lifecycle::{
    AuthorizationGrant, GrantOutcome, LifecycleController, LifecycleEvent, LifecycleHandle,
};
pub use listener::{BoxedConnection, ConnectionListener, ConnectionStream, Endpoint};
pub use protocol::{MAGIC, perform_handshake, read_magic, request_descriptor, write_descriptor};
pub use session::{SessionConfig, SessionId, SessionManager, SessionReport, SessionState};
pub use streamer::{FrameStreamer, SessionEnd, StreamOutcome};
pub use types::{
    AccessUnit, AuthorizationToken, BufferFlags, DeviceDescriptor, Dimensions, DisplayInfo,
};

//! Connection handshake.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[ "sccpp" ]─────────────────────────► Agent    (5 bytes, exact)
//! Agent  ──[ descriptor utf-8 | 0x00 ]─────────► Client   (on success)
//! ```
//!
//! On a bad or missing magic the agent writes nothing and closes the
//! connection. The exchange happens once per connection and always
//! completes before the first access unit is written.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HandshakeError;
use crate::types::DeviceDescriptor;

/// The magic token a client must send first.
pub const MAGIC: &[u8; 5] = b"sccpp";

/// Length of [`MAGIC`] on the wire.
pub const MAGIC_LEN: usize = MAGIC.len();

/// Terminator following the descriptor.
pub const DESCRIPTOR_TERMINATOR: u8 = 0x00;

/// Longest descriptor a client will accept, terminator included.
pub const MAX_DESCRIPTOR_WIRE_LEN: usize = DeviceDescriptor::MAX_LEN + 1;

// ── Agent side ───────────────────────────────────────────────────

/// Read exactly [`MAGIC_LEN`] bytes and compare them against [`MAGIC`].
///
/// Never writes to the stream.
pub async fn read_magic<S>(stream: &mut S, timeout: Duration) -> Result<(), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; MAGIC_LEN];
    match tokio::time::timeout(timeout, stream.read_exact(&mut buf)).await {
        Err(_) => Err(HandshakeError::Timeout(timeout)),
        Ok(Err(e)) => Err(HandshakeError::Read(e)),
        Ok(Ok(_)) if &buf == MAGIC => Ok(()),
        Ok(Ok(_)) => Err(HandshakeError::BadMagic),
    }
}

/// Write the descriptor followed by its terminator, then flush.
pub async fn write_descriptor<S>(
    stream: &mut S,
    descriptor: &DeviceDescriptor,
) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    let name = descriptor.as_str().as_bytes();
    let mut reply = Vec::with_capacity(name.len() + 1);
    reply.extend_from_slice(name);
    reply.push(DESCRIPTOR_TERMINATOR);

    stream.write_all(&reply).await.map_err(HandshakeError::Write)?;
    stream.flush().await.map_err(HandshakeError::Write)
}

/// Validate the magic and reply with the descriptor.
pub async fn perform_handshake<S>(
    stream: &mut S,
    descriptor: &DeviceDescriptor,
    timeout: Duration,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    read_magic(stream, timeout).await?;
    write_descriptor(stream, descriptor).await
}

// ── Client side ──────────────────────────────────────────────────

/// Send the magic and read back the NUL-terminated descriptor.
///
/// Reads byte-by-byte so nothing past the terminator is consumed; the
/// caller can wrap the stream in a frame decoder right away.
pub async fn request_descriptor<S>(
    stream: &mut S,
    timeout: Duration,
) -> Result<String, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(MAGIC).await.map_err(HandshakeError::Write)?;
    stream.flush().await.map_err(HandshakeError::Write)?;

    let read = async {
        let mut name = Vec::new();
        loop {
            let byte = stream.read_u8().await.map_err(HandshakeError::Read)?;
            if byte == DESCRIPTOR_TERMINATOR {
                return Ok(name);
            }
            name.push(byte);
            if name.len() >= MAX_DESCRIPTOR_WIRE_LEN {
                return Err(HandshakeError::DescriptorTooLong(MAX_DESCRIPTOR_WIRE_LEN));
            }
        }
    };

    let name = tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))??;
    String::from_utf8(name).map_err(|_| HandshakeError::InvalidDescriptor)
}

//! Host-side client: the controller end of the protocol.

use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::codec::AccessUnitCodec;
use crate::error::MirrorError;
use crate::listener::{BoxedConnection, Endpoint};
use crate::protocol::request_descriptor;
use crate::types::AccessUnit;

/// A connection past the handshake, yielding access units.
pub struct MirrorClient<S> {
    descriptor: String,
    frames: FramedRead<S, AccessUnitCodec>,
}

impl MirrorClient<BoxedConnection> {
    /// Connect to `endpoint` and perform the handshake.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, MirrorError> {
        let stream = tokio::time::timeout(timeout, endpoint.connect())
            .await
            .map_err(|_| MirrorError::Timeout(timeout))??;
        Self::handshake(stream, timeout).await
    }
}

impl<S> MirrorClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send the magic over `stream` and read the device descriptor.
    pub async fn handshake(mut stream: S, timeout: Duration) -> Result<Self, MirrorError> {
        let descriptor = request_descriptor(&mut stream, timeout).await?;
        debug!(%descriptor, "handshake complete");
        Ok(Self {
            descriptor,
            frames: FramedRead::new(stream, AccessUnitCodec::new()),
        })
    }

    /// Identity the agent announced.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Next access unit, or `None` once the agent closed the connection.
    pub async fn next_unit(&mut self) -> Option<Result<AccessUnit, MirrorError>> {
        self.frames.next().await
    }

    pub fn into_inner(self) -> S {
        self.frames.into_inner()
    }
}

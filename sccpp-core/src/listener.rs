//! Connection listener.
//!
//! Binds the local stream endpoint the agent is reached through and hands
//! every accepted connection to the [`SessionManager`] on its own task.
//! Which connection gets to stream is the manager's call, not the
//! listener's.
//!
//! ```text
//! ┌──────────────────┐  accept   ┌────────────────────┐
//! │ ConnectionListener│ ───────► │ task per connection │ ──► SessionManager
//! └──────────────────┘           └────────────────────┘
//! ```

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::MirrorError;
use crate::session::SessionManager;

/// Abstract socket name the agent listens on by default.
pub const DEFAULT_SOCKET_NAME: &str = "sccpp";

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ── Endpoint ─────────────────────────────────────────────────────

/// A local stream endpoint.
///
/// String form: `abstract:<name>`, `unix:<path>` or `tcp:<ip:port>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// Linux abstract-namespace socket. What `adb forward localabstract:`
    /// connects to.
    Abstract(String),
    /// Filesystem Unix socket.
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Abstract(DEFAULT_SOCKET_NAME.into())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract(name) => write!(f, "abstract:{name}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MirrorError::InvalidEndpoint(s.to_string());
        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match scheme {
            "abstract" => Ok(Self::Abstract(rest.to_string())),
            "unix" => Ok(Self::Unix(PathBuf::from(rest))),
            "tcp" => rest.parse().map(Self::Tcp).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = MirrorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl Endpoint {
    /// Open a client connection to this endpoint.
    pub async fn connect(&self) -> io::Result<BoxedConnection> {
        match self {
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Self::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
            #[cfg(unix)]
            Self::Abstract(name) => Ok(Box::new(local::connect_abstract(name)?)),
            #[cfg(not(unix))]
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )),
        }
    }
}

// ── Connections ──────────────────────────────────────────────────

/// Any byte stream a session can run over.
pub trait ConnectionStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ConnectionStream for T {}

pub type BoxedConnection = Box<dyn ConnectionStream>;

// ── ConnectionListener ───────────────────────────────────────────

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

pub struct ConnectionListener {
    inner: Inner,
    endpoint: Endpoint,
    connection_counter: AtomicU64,
}

impl ConnectionListener {
    /// Bind `endpoint`. Any failure here is fatal to the agent.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, MirrorError> {
        let bind_err = |source: io::Error| MirrorError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        let (inner, endpoint) = match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
                let local = listener.local_addr().map_err(bind_err)?;
                (Inner::Tcp(listener), Endpoint::Tcp(local))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => (
                Inner::Unix(local::bind_path(path).await.map_err(bind_err)?),
                endpoint.clone(),
            ),
            #[cfg(unix)]
            Endpoint::Abstract(name) => (
                Inner::Unix(local::bind_abstract(name).map_err(bind_err)?),
                endpoint.clone(),
            ),
            #[cfg(not(unix))]
            _ => {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not available on this platform",
                )));
            }
        };

        Ok(Self {
            inner,
            endpoint,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// The bound endpoint, with the real port for `tcp:…:0`.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Wait for the next connection. Returns the stream and a peer label.
    pub async fn accept(&self) -> io::Result<(BoxedConnection, String)> {
        match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), addr.to_string()))
            }
            #[cfg(unix)]
            Inner::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                let n = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                Ok((Box::new(stream), format!("local#{n}")))
            }
        }
    }

    /// Accept connections until `shutdown` fires, then wait for the
    /// spawned connection tasks to finish.
    pub async fn run(self, manager: Arc<SessionManager>, shutdown: CancellationToken) {
        info!(endpoint = %self.endpoint, "listening");
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("listener shutdown requested");
                    break;
                }

                accepted = self.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer, "connection accepted");
                        let manager = Arc::clone(&manager);
                        tracker.spawn(async move {
                            // Failures are logged inside the manager.
                            let _ = manager.handle_connection(stream, &peer).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        tracker.close();
        tracker.wait().await;
        self.cleanup();
    }

    fn cleanup(&self) {
        if let Endpoint::Unix(path) = &self.endpoint {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "socket file removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => error!(path = %path.display(), "failed to remove socket file: {e}"),
            }
        }
    }
}

// ── Unix sockets ─────────────────────────────────────────────────

#[cfg(unix)]
mod local {
    use std::io;
    use std::path::Path;

    use tokio::net::{UnixListener, UnixStream};
    use tracing::info;

    /// Bind a filesystem socket, replacing a stale socket file.
    ///
    /// The file is only removed when nothing accepts on it; a live
    /// listener keeps its address and the bind fails.
    pub(super) async fn bind_path(path: &Path) -> io::Result<UnixListener> {
        match UnixListener::bind(path) {
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if UnixStream::connect(path).await.is_ok() {
                    return Err(e);
                }
                info!(path = %path.display(), "removing stale socket file");
                std::fs::remove_file(path)?;
                UnixListener::bind(path)
            }
            other => other,
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn abstract_addr(name: &str) -> io::Result<std::os::unix::net::SocketAddr> {
        #[cfg(target_os = "android")]
        use std::os::android::net::SocketAddrExt;
        #[cfg(target_os = "linux")]
        use std::os::linux::net::SocketAddrExt;

        std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(super) fn bind_abstract(name: &str) -> io::Result<UnixListener> {
        let listener = std::os::unix::net::UnixListener::bind_addr(&abstract_addr(name)?)?;
        listener.set_nonblocking(true)?;
        UnixListener::from_std(listener)
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(super) fn connect_abstract(name: &str) -> io::Result<UnixStream> {
        let stream = std::os::unix::net::UnixStream::connect_addr(&abstract_addr(name)?)?;
        stream.set_nonblocking(true)?;
        UnixStream::from_std(stream)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(super) fn bind_abstract(_name: &str) -> io::Result<UnixListener> {
        Err(unsupported())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(super) fn connect_abstract(_name: &str) -> io::Result<UnixStream> {
        Err(unsupported())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "abstract sockets need Linux or Android",
        )
    }
}

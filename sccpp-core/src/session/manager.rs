//! Session manager: the single session slot and the per-connection pipeline.
//!
//! ```text
//!  accept ─► read magic ─► claim slot ─► write descriptor ─► start encoder
//!                │              │                │                 │
//!                ▼              ▼                ▼                 ▼
//!             close          close           teardown          teardown
//!                                                                  │
//!                                     stream until end ─► teardown ─► release slot
//! ```
//!
//! The slot lock is only held for check-and-transition, never across an
//! `.await`. Every state change is published on a `watch` channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::encoder::{CaptureEncoder, EncoderHandle};
use crate::error::MirrorError;
use crate::protocol::{read_magic, write_descriptor};
use crate::session::state::{SessionId, SessionState};
use crate::streamer::{DEFAULT_POLL_INTERVAL, DEFAULT_WRITE_TIMEOUT, FrameStreamer, SessionEnd};
use crate::types::{AuthorizationToken, DeviceDescriptor};

/// Default deadline for the client to send the magic.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default budget for each teardown step.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_millis(500);

// ── SessionConfig ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a fresh connection may take to send the magic.
    pub handshake_timeout: Duration,
    /// Bounded wait on the encoder per streaming poll.
    pub poll_interval: Duration,
    /// Deadline for writing and flushing one frame.
    pub write_timeout: Duration,
    /// Budget for each teardown step (detach, stop, socket shutdown).
    pub teardown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

/// Summary of one finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: SessionId,
    pub frames: u64,
    pub bytes: u64,
    pub end: SessionEnd,
    /// From slot claim to slot release.
    pub duration: Duration,
}

// ── Slot ─────────────────────────────────────────────────────────

struct Slot {
    state: SessionState,
    /// Present exactly while capture is authorized.
    token: Option<AuthorizationToken>,
    /// Cancels the session holding the slot.
    active: Option<CancellationToken>,
}

// ── SessionManager ───────────────────────────────────────────────

pub struct SessionManager {
    config: SessionConfig,
    descriptor: DeviceDescriptor,
    encoder: CaptureEncoder,
    streamer: FrameStreamer,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
    status: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, descriptor: DeviceDescriptor, encoder: CaptureEncoder) -> Self {
        let (status, _) = watch::channel(SessionState::Idle);
        Self {
            streamer: FrameStreamer::new(config.poll_interval, config.write_timeout),
            config,
            descriptor,
            encoder,
            slot: Mutex::new(Slot {
                state: SessionState::Idle,
                token: None,
                active: None,
            }),
            next_id: AtomicU64::new(1),
            status,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn encoder(&self) -> &CaptureEncoder {
        &self.encoder
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.lock_slot().state.clone()
    }

    /// Receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.status.subscribe()
    }

    pub fn is_authorized(&self) -> bool {
        self.lock_slot().token.is_some()
    }

    // ── Lifecycle inputs ─────────────────────────────────────────

    /// Store a capture authorization.
    ///
    /// While a session holds the slot only the token is replaced; the
    /// running session keeps the frame source it started with.
    pub fn authorize(&self, token: AuthorizationToken) {
        let mut slot = self.lock_slot();
        slot.token = Some(token);
        match slot.state.authorize() {
            Ok(()) => info!("capture authorized"),
            Err(_) => debug!(state = %slot.state, "capture token refreshed"),
        }
        self.publish(&slot);
    }

    /// Drop the authorization and stop the active session, if any.
    pub fn revoke(&self) -> Option<SessionId> {
        let mut slot = self.lock_slot();
        slot.token = None;
        let active = slot.state.revoke();
        match active {
            Some(id) => {
                info!(session = %id, "capture revoked, stopping session");
                Self::cancel_active(&mut slot, id);
            }
            None => info!("capture revoked"),
        }
        self.publish(&slot);
        active
    }

    /// Stop the active session but keep the authorization.
    pub fn stop_active(&self) -> Option<SessionId> {
        let mut slot = self.lock_slot();
        let active = slot.state.active_session();
        if let Some(id) = active {
            info!(session = %id, "stopping session");
            Self::cancel_active(&mut slot, id);
            self.publish(&slot);
        }
        active
    }

    fn cancel_active(slot: &mut Slot, id: SessionId) {
        if let Some(cancel) = &slot.active {
            cancel.cancel();
        }
        if let Err(e) = slot.state.begin_closing(id) {
            debug!(session = %id, "{e}");
        }
    }

    // ── Connection pipeline ──────────────────────────────────────

    /// Drive one accepted connection to completion.
    ///
    /// A connection that fails the magic check, or arrives while capture is
    /// unauthorized or another session holds the slot, is closed without a
    /// single byte written. Errors are logged here with their phase; the
    /// returned `Result` is informational.
    pub async fn handle_connection<S>(
        &self,
        mut stream: S,
        peer: &str,
    ) -> Result<SessionReport, MirrorError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        if let Err(e) = read_magic(&mut stream, self.config.handshake_timeout).await {
            info!(peer, phase = "handshake", "closing connection: {e}");
            self.close_connection(&mut stream).await;
            return Err(e.into());
        }

        let (id, token, cancel) = match self.claim() {
            Ok(claimed) => claimed,
            Err(e) => {
                info!(peer, phase = "handshake", "closing connection: {e}");
                self.close_connection(&mut stream).await;
                return Err(e);
            }
        };

        self.run_session(id, stream, token, cancel)
            .instrument(info_span!("session", session = %id, peer))
            .await
    }

    fn claim(&self) -> Result<(SessionId, AuthorizationToken, CancellationToken), MirrorError> {
        let mut slot = self.lock_slot();
        let token = slot.token.clone().ok_or(MirrorError::Unauthorized)?;
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        slot.state.claim(id)?;

        let cancel = CancellationToken::new();
        slot.active = Some(cancel.clone());
        self.publish(&slot);
        Ok((id, token, cancel))
    }

    async fn run_session<S>(
        &self,
        id: SessionId,
        mut stream: S,
        token: AuthorizationToken,
        cancel: CancellationToken,
    ) -> Result<SessionReport, MirrorError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let started = Instant::now();

        if let Err(e) = write_descriptor(&mut stream, &self.descriptor).await {
            warn!(phase = "handshake", "{e}");
            self.teardown(id, stream, None).await;
            return Err(e.into());
        }
        info!(descriptor = %self.descriptor, "handshake complete");

        let mut encoder = match self.encoder.start(&token).await {
            Ok(encoder) => encoder,
            Err(e) => {
                warn!(phase = "encoder-start", "{e}");
                self.teardown(id, stream, None).await;
                return Err(e.into());
            }
        };
        drop(token);
        debug!(size = %encoder.format().size, "streaming");

        let outcome = {
            let (mut reader, mut writer) = tokio::io::split(&mut stream);
            self.streamer
                .run(&mut reader, &mut writer, &mut encoder, &cancel)
                .await
        };

        self.teardown(id, stream, Some(encoder)).await;

        let report = SessionReport {
            session: id,
            frames: outcome.frames,
            bytes: outcome.bytes,
            end: outcome.end,
            duration: started.elapsed(),
        };
        info!(
            frames = report.frames,
            bytes = report.bytes,
            duration_ms = report.duration.as_millis() as u64,
            "session ended: {}",
            report.end
        );
        Ok(report)
    }

    /// Release everything the session owns and free the slot.
    ///
    /// Takes the stream and encoder by value, so it can only run once per
    /// session.
    async fn teardown<S>(&self, id: SessionId, mut stream: S, encoder: Option<EncoderHandle>)
    where
        S: AsyncWrite + Unpin,
    {
        {
            let mut slot = self.lock_slot();
            if let Err(e) = slot.state.begin_closing(id) {
                warn!(phase = "teardown", "{e}");
            }
            self.publish(&slot);
        }

        if let Some(mut encoder) = encoder {
            encoder.release(self.config.teardown_timeout).await;
        }
        self.close_connection(&mut stream).await;
        drop(stream);

        let mut slot = self.lock_slot();
        let still_authorized = slot.token.is_some();
        if let Err(e) = slot.state.finish_closing(id, still_authorized) {
            warn!(phase = "teardown", "{e}");
        }
        slot.active = None;
        self.publish(&slot);
        debug!(phase = "teardown", state = %slot.state, "slot released");
    }

    async fn close_connection<S>(&self, stream: &mut S)
    where
        S: AsyncWrite + Unpin,
    {
        match tokio::time::timeout(self.config.teardown_timeout, stream.shutdown()).await {
            Err(_) => debug!(phase = "teardown", "connection shutdown timed out"),
            Ok(Err(e)) => debug!(phase = "teardown", "connection shutdown failed: {e}"),
            Ok(Ok(())) => {}
        }
    }

    // ── Slot helpers ─────────────────────────────────────────────

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, slot: &Slot) {
        self.status.send_replace(slot.state.clone());
    }
}

//! Lifecycle controller.
//!
//! Turns external signals into state changes of the [`SessionManager`]:
//! the permission flow's grant or denial, a platform capture-stop
//! callback, an explicit revoke, and agent shutdown. Producers hold a
//! cloneable [`LifecycleHandle`]; the controller applies events in order.
//!
//! Signals never touch the connection directly. They flip the slot state
//! and cancel the session, and the streaming loop notices on its next
//! bounded wait.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MirrorError;
use crate::session::SessionManager;
use crate::types::AuthorizationToken;

const EVENT_QUEUE_DEPTH: usize = 16;

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    Denied,
}

/// Result of the external permission flow.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub outcome: GrantOutcome,
    pub token: Option<AuthorizationToken>,
}

impl AuthorizationGrant {
    pub fn granted(token: AuthorizationToken) -> Self {
        Self {
            outcome: GrantOutcome::Granted,
            token: Some(token),
        }
    }

    pub fn denied() -> Self {
        Self {
            outcome: GrantOutcome::Denied,
            token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// The permission flow finished.
    Grant(AuthorizationGrant),
    /// The authorization was withdrawn.
    Revoke,
    /// The platform stopped the capture on its own.
    CaptureStopped,
    /// The agent is going away.
    Shutdown,
}

// ── LifecycleHandle ──────────────────────────────────────────────

/// Sending side of the lifecycle channel.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl LifecycleHandle {
    pub async fn send(&self, event: LifecycleEvent) -> Result<(), MirrorError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| MirrorError::ChannelClosed)
    }

    pub async fn grant(&self, grant: AuthorizationGrant) -> Result<(), MirrorError> {
        self.send(LifecycleEvent::Grant(grant)).await
    }

    pub async fn revoke(&self) -> Result<(), MirrorError> {
        self.send(LifecycleEvent::Revoke).await
    }

    pub async fn capture_stopped(&self) -> Result<(), MirrorError> {
        self.send(LifecycleEvent::CaptureStopped).await
    }

    pub async fn shutdown(&self) -> Result<(), MirrorError> {
        self.send(LifecycleEvent::Shutdown).await
    }
}

// ── LifecycleController ──────────────────────────────────────────

pub struct LifecycleController {
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
    rx: mpsc::Receiver<LifecycleEvent>,
}

impl LifecycleController {
    /// Create a controller for `manager` and the handle that feeds it.
    ///
    /// `shutdown` is cancelled when a [`LifecycleEvent::Shutdown`] is
    /// applied.
    pub fn new(
        manager: Arc<SessionManager>,
        shutdown: CancellationToken,
    ) -> (Self, LifecycleHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        (
            Self {
                manager,
                shutdown,
                rx,
            },
            LifecycleHandle { tx },
        )
    }

    /// Apply one event to the session manager.
    pub fn apply(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Grant(AuthorizationGrant {
                outcome: GrantOutcome::Granted,
                token: Some(token),
            }) => {
                self.manager.authorize(token);
            }
            LifecycleEvent::Grant(grant) => {
                warn!(outcome = ?grant.outcome, "capture not granted");
                self.manager.revoke();
            }
            LifecycleEvent::Revoke => {
                self.manager.revoke();
            }
            LifecycleEvent::CaptureStopped => {
                info!("platform stopped the capture");
                self.manager.revoke();
            }
            LifecycleEvent::Shutdown => {
                info!("shutdown requested");
                self.manager.revoke();
                self.shutdown.cancel();
            }
        }
    }

    /// Apply events until shutdown, or until every handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    // Shutdown triggered elsewhere still ends the session.
                    self.manager.revoke();
                    break;
                }

                event = self.rx.recv() => match event {
                    Some(event) => {
                        debug!(?event, "lifecycle event");
                        self.apply(event);
                    }
                    None => {
                        debug!("all lifecycle handles dropped");
                        break;
                    }
                },
            }
        }
    }
}

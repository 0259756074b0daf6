//! Single-session state machine.
//!
//! Models the agent's one session slot with validated transitions that
//! return `Result` instead of panicking.
//!
//! ```text
//!          authorize              claim
//!   Idle ───────────► Authorized ───────► Streaming
//!    ▲  ◄───────────      ▲                   │
//!    │     revoke         │ token held        │ disconnect / end-of-stream
//!    │                    │                   │ stop / revoke / error
//!    │   token revoked    │                   ▼
//!    └─────────────────── Closing ◄───────────┘
//! ```

use std::fmt;
use std::time::Instant;

use crate::error::MirrorError;

// ── SessionId ────────────────────────────────────────────────────

/// Process-unique identifier of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── SessionState ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No capture authorization. Initial and terminal state.
    #[default]
    Idle,

    /// Authorization held, nobody streaming.
    Authorized,

    /// One connection is being fed.
    Streaming {
        session: SessionId,
        /// When the slot was claimed.
        since: Instant,
    },

    /// Teardown of `session` in progress; the slot is still taken.
    Closing { session: SessionId },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Authorized => write!(f, "Authorized"),
            Self::Streaming { session, .. } => write!(f, "Streaming({session})"),
            Self::Closing { session } => write!(f, "Closing({session})"),
        }
    }
}

impl SessionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The session holding the slot, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        match self {
            Self::Streaming { session, .. } | Self::Closing { session } => Some(*session),
            _ => None,
        }
    }

    /// How long the current session has been streaming.
    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Streaming { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`, `Authorized` (token refresh).
    pub fn authorize(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Idle | Self::Authorized => {
                *self = Self::Authorized;
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot authorize: a session holds the slot",
            )),
        }
    }

    /// Claim the slot for `session`.
    ///
    /// Valid from: `Authorized`. From `Idle` this is
    /// [`MirrorError::Unauthorized`]; with the slot taken it is
    /// [`MirrorError::RejectedConcurrentSession`].
    pub fn claim(&mut self, session: SessionId) -> Result<(), MirrorError> {
        match self {
            Self::Authorized => {
                *self = Self::Streaming {
                    session,
                    since: Instant::now(),
                };
                Ok(())
            }
            Self::Idle => Err(MirrorError::Unauthorized),
            Self::Streaming { .. } | Self::Closing { .. } => {
                Err(MirrorError::RejectedConcurrentSession)
            }
        }
    }

    /// Valid from: `Streaming(session)`; repeated calls while already
    /// `Closing(session)` are no-ops.
    pub fn begin_closing(&mut self, session: SessionId) -> Result<(), MirrorError> {
        match self {
            Self::Streaming { session: s, .. } if *s == session => {
                *self = Self::Closing { session };
                Ok(())
            }
            Self::Closing { session: s } if *s == session => Ok(()),
            _ => Err(MirrorError::InvalidTransition(
                "cannot close: session does not hold the slot",
            )),
        }
    }

    /// Free the slot. Lands in `Authorized` when the token survived.
    ///
    /// Valid from: `Closing(session)`.
    pub fn finish_closing(
        &mut self,
        session: SessionId,
        still_authorized: bool,
    ) -> Result<(), MirrorError> {
        match self {
            Self::Closing { session: s } if *s == session => {
                *self = if still_authorized {
                    Self::Authorized
                } else {
                    Self::Idle
                };
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot finish closing: session is not closing",
            )),
        }
    }

    /// Drop the authorization.
    ///
    /// `Authorized` falls back to `Idle`. A held slot is left alone and its
    /// session is returned so the caller can cancel it; it will close into
    /// `Idle`.
    pub fn revoke(&mut self) -> Option<SessionId> {
        match self {
            Self::Idle | Self::Authorized => {
                *self = Self::Idle;
                None
            }
            Self::Streaming { session, .. } | Self::Closing { session } => Some(*session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SessionId = SessionId(1);
    const B: SessionId = SessionId(2);

    #[test]
    fn happy_path_lifecycle() {
        let mut state = SessionState::default();
        assert!(state.is_idle());

        state.authorize().unwrap();
        assert_eq!(state, SessionState::Authorized);

        state.claim(A).unwrap();
        assert!(state.is_streaming());
        assert_eq!(state.active_session(), Some(A));
        assert!(state.streaming_duration().is_some());

        state.begin_closing(A).unwrap();
        assert_eq!(state, SessionState::Closing { session: A });

        state.finish_closing(A, true).unwrap();
        assert_eq!(state, SessionState::Authorized);
    }

    #[test]
    fn claim_without_authorization_is_unauthorized() {
        let mut state = SessionState::Idle;
        assert!(matches!(state.claim(A), Err(MirrorError::Unauthorized)));
        assert!(state.is_idle());
    }

    #[test]
    fn second_claim_is_rejected() {
        let mut state = SessionState::Authorized;
        state.claim(A).unwrap();
        assert!(matches!(
            state.claim(B),
            Err(MirrorError::RejectedConcurrentSession)
        ));
        assert_eq!(state.active_session(), Some(A));

        // Still rejected while the first session is tearing down.
        state.begin_closing(A).unwrap();
        assert!(matches!(
            state.claim(B),
            Err(MirrorError::RejectedConcurrentSession)
        ));
    }

    #[test]
    fn closing_is_idempotent_and_owner_checked() {
        let mut state = SessionState::Authorized;
        state.claim(A).unwrap();

        assert!(state.begin_closing(B).is_err());
        state.begin_closing(A).unwrap();
        state.begin_closing(A).unwrap();
        assert!(state.finish_closing(B, true).is_err());

        state.finish_closing(A, false).unwrap();
        assert!(state.is_idle());
        assert!(state.finish_closing(A, false).is_err());
        assert!(state.begin_closing(A).is_err());
    }

    #[test]
    fn revoke_while_idle_or_authorized() {
        let mut state = SessionState::Authorized;
        assert_eq!(state.revoke(), None);
        assert!(state.is_idle());
        assert_eq!(state.revoke(), None);
        assert!(state.is_idle());
    }

    #[test]
    fn revoke_while_streaming_reports_the_session() {
        let mut state = SessionState::Authorized;
        state.claim(A).unwrap();
        assert_eq!(state.revoke(), Some(A));
        assert!(state.is_streaming());
    }

    #[test]
    fn authorize_refused_while_slot_held() {
        let mut state = SessionState::Authorized;
        state.claim(A).unwrap();
        assert!(state.authorize().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionState::Idle.to_string(), "Idle");
        assert_eq!(SessionState::Authorized.to_string(), "Authorized");
        assert_eq!(
            SessionState::Closing { session: A }.to_string(),
            "Closing(#1)"
        );
    }
}

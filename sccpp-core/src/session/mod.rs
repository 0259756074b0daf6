//! Session slot and the per-connection pipeline.

pub mod manager;
pub mod state;

pub use manager::{SessionConfig, SessionManager, SessionReport};
pub use state::{SessionId, SessionState};

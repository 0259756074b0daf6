//! Agent service core logic.
//!
//! Wires the capture backend, the session manager, the lifecycle
//! controller and the connection listener together, then serves until a
//! shutdown event arrives.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sccpp_core::encoder::EncoderCapabilities;
use sccpp_core::{
    AuthorizationGrant, AuthorizationToken, CaptureBackend, CaptureEncoder, ConnectionListener,
    EncoderError, LifecycleController, LifecycleHandle, MirrorError, SessionManager,
    SyntheticBackend,
};

use crate::config::AgentConfig;

// ── MirrorAgent ──────────────────────────────────────────────────

/// The top-level agent.
///
/// Owns the session manager and the lifecycle controller. External
/// signals (permission grants, capture stop, Ctrl-C) reach it through
/// [`lifecycle`](Self::lifecycle).
pub struct MirrorAgent {
    config: AgentConfig,
    manager: Arc<SessionManager>,
    controller: LifecycleController,
    lifecycle: LifecycleHandle,
    shutdown: CancellationToken,
}

impl MirrorAgent {
    /// Build the agent from `config`. Does not bind anything yet.
    pub fn new(config: AgentConfig) -> Result<Self, MirrorError> {
        let backend = build_backend(&config)?;
        let encoder = CaptureEncoder::new(backend, config.encoder.clone())
            .with_attach_timeout(config.attach_timeout());
        let manager = Arc::new(SessionManager::new(
            config.to_session_config(),
            config.descriptor()?,
            encoder,
        ));

        let shutdown = CancellationToken::new();
        let (controller, lifecycle) =
            LifecycleController::new(Arc::clone(&manager), shutdown.clone());

        Ok(Self {
            config,
            manager,
            controller,
            lifecycle,
            shutdown,
        })
    }

    /// Handle for delivering lifecycle events.
    pub fn lifecycle(&self) -> LifecycleHandle {
        self.lifecycle.clone()
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Query the encoder without starting a session.
    pub fn capabilities(&self) -> Result<EncoderCapabilities, EncoderError> {
        self.manager.encoder().probe_capabilities()
    }

    /// Serve until shutdown.
    ///
    /// Only a bind failure is returned as an error; everything that goes
    /// wrong inside a session stays inside that session.
    pub async fn run(self) -> Result<(), MirrorError> {
        let Self {
            config,
            manager,
            controller,
            lifecycle,
            shutdown,
        } = self;

        info!(
            backend = manager.encoder().backend_name(),
            descriptor = %manager.descriptor(),
            "starting agent"
        );
        match manager.encoder().probe_capabilities() {
            Ok(caps) => log_capabilities(&caps),
            Err(e) => warn!("encoder capability query failed: {e}"),
        }

        let listener = ConnectionListener::bind(&config.listener.endpoint).await?;
        let controller = tokio::spawn(controller.run());
        let status = tokio::spawn(log_state_changes(Arc::clone(&manager)));

        if config.capture.auto_grant {
            lifecycle
                .grant(AuthorizationGrant::granted(AuthorizationToken::new(
                    &b"local"[..],
                    &b""[..],
                )))
                .await?;
        } else {
            info!("waiting for a capture grant");
        }

        listener.run(Arc::clone(&manager), shutdown.clone()).await;

        shutdown.cancel();
        let _ = controller.await;
        status.abort();
        info!("agent stopped");
        Ok(())
    }
}

fn build_backend(config: &AgentConfig) -> Result<Arc<dyn CaptureBackend>, MirrorError> {
    match config.capture.backend.as_str() {
        "synthetic" => Ok(Arc::new(SyntheticBackend::new(config.to_synthetic_config()))),
        other => Err(MirrorError::Encoder(EncoderError::Unsupported(format!(
            "capture backend {other:?}"
        )))),
    }
}

/// Log what the encoder supports, one line per profile/level.
fn log_capabilities(caps: &EncoderCapabilities) {
    info!(encoder = %caps.name, mime = %caps.mime, "encoder capabilities");
    for pl in &caps.profile_levels {
        debug!(
            profile = format_args!("{:#x}", pl.profile),
            level = format_args!("{:#x}", pl.level),
            "supported profile/level"
        );
    }
    debug!(color_formats = ?caps.color_formats, "supported color formats");
}

async fn log_state_changes(manager: Arc<SessionManager>) {
    let mut status = manager.subscribe();
    drop(manager);
    while status.changed().await.is_ok() {
        let state = status.borrow_and_update().clone();
        debug!(%state, "session state changed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn tcp_config(endpoint: &str) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.listener.endpoint = endpoint.parse().unwrap();
        config.device.name = "TestDevice".into();
        config
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = tcp_config("tcp:127.0.0.1:0");
        config.capture.backend = "mediacodec".into();
        assert!(matches!(
            MirrorAgent::new(config),
            Err(MirrorError::Encoder(EncoderError::Unsupported(_)))
        ));
    }

    #[test]
    fn capabilities_come_from_the_backend() {
        let agent = MirrorAgent::new(tcp_config("tcp:127.0.0.1:0")).unwrap();
        let caps = agent.capabilities().unwrap();
        assert_eq!(caps.mime, "video/avc");
    }

    #[tokio::test]
    async fn shutdown_event_stops_run() {
        let agent = MirrorAgent::new(tcp_config("tcp:127.0.0.1:0")).unwrap();
        let lifecycle = agent.lifecycle();
        let manager = Arc::clone(agent.manager());
        let task = tokio::spawn(agent.run());

        let mut status = manager.subscribe();
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| !s.is_idle()))
            .await
            .unwrap()
            .unwrap();

        lifecycle.shutdown().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(manager.state().is_idle());
    }

    #[tokio::test]
    async fn address_in_use_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let agent = MirrorAgent::new(tcp_config(&format!("tcp:{addr}"))).unwrap();
        let err = agent.run().await.unwrap_err();
        assert!(err.is_fatal());
    }
}

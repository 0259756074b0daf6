//! Shared helpers: a scripted capture backend that counts lifecycle calls,
//! and an in-process agent bound to an ephemeral endpoint.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sccpp_core::encoder::{
    BufferInfo, ColorFormat, Dequeued, EncoderCapabilities, InputSurface, ProfileLevel,
    VideoFormat,
};
use sccpp_core::{
    AuthorizationGrant, AuthorizationToken, BufferFlags, CaptureBackend, CaptureEncoder,
    ConnectionListener, DeviceDescriptor, Dimensions, DisplayInfo, EncoderConfig, EncoderError,
    Endpoint, FrameSource, LifecycleController, LifecycleHandle, SessionConfig, SessionManager,
    SessionState, VideoEncoder,
};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEVICE: &str = "TestDevice";

pub const WAIT: Duration = Duration::from_secs(5);

// ── Counters ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Counters {
    pub started: AtomicUsize,
    pub attached: AtomicUsize,
    pub detached: AtomicUsize,
    pub stopped: AtomicUsize,
    pub released: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

// ── ScriptedBackend ──────────────────────────────────────────────

/// One scripted encoder output.
#[derive(Debug, Clone)]
pub struct ScriptedUnit {
    pub timestamp_us: i64,
    pub payload: Vec<u8>,
    pub flags: BufferFlags,
}

impl ScriptedUnit {
    pub fn new(timestamp_us: i64, payload: &[u8]) -> Self {
        Self {
            timestamp_us,
            payload: payload.to_vec(),
            flags: BufferFlags::KEY_FRAME,
        }
    }

    pub fn end_of_stream(timestamp_us: i64) -> Self {
        Self {
            timestamp_us,
            payload: Vec::new(),
            flags: BufferFlags::END_OF_STREAM,
        }
    }

    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Replays a fixed list of units. Past the end it stays silent.
///
/// With a gate, each unit waits for one permit, so tests decide when the
/// next unit appears.
pub struct ScriptedBackend {
    script: Vec<ScriptedUnit>,
    gate: Option<Arc<Semaphore>>,
    fail_configure: bool,
    pub counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptedUnit>) -> Self {
        Self {
            script,
            gate: None,
            fail_configure: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn gated(script: Vec<ScriptedUnit>, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    pub fn failing_configure() -> Self {
        Self {
            fail_configure: true,
            ..Self::new(Vec::new())
        }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn display(&self) -> Result<DisplayInfo, EncoderError> {
        Ok(DisplayInfo {
            size: Dimensions::new(720, 1280),
            dpi: 320,
        })
    }

    fn create_encoder(&self, _mime: &str) -> Result<Box<dyn VideoEncoder>, EncoderError> {
        Ok(Box::new(ScriptedEncoder {
            script: self.script.clone(),
            next: 0,
            gate: self.gate.clone(),
            fail_configure: self.fail_configure,
            in_flight: None,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn create_frame_source(
        &self,
        _token: &AuthorizationToken,
    ) -> Result<Box<dyn FrameSource>, EncoderError> {
        Ok(Box::new(ScriptedSource {
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedEncoder {
    script: Vec<ScriptedUnit>,
    next: usize,
    gate: Option<Arc<Semaphore>>,
    fail_configure: bool,
    in_flight: Option<Vec<u8>>,
    counters: Arc<Counters>,
}

#[async_trait]
impl VideoEncoder for ScriptedEncoder {
    fn name(&self) -> &str {
        "scripted.encoder"
    }

    fn capabilities(&self) -> EncoderCapabilities {
        EncoderCapabilities {
            name: "scripted.encoder".into(),
            mime: "video/avc".into(),
            profile_levels: vec![ProfileLevel {
                profile: 1,
                level: 0x200,
            }],
            color_formats: vec![ColorFormat::Surface as u32],
        }
    }

    fn configure(&mut self, _format: &VideoFormat) -> Result<(), EncoderError> {
        if self.fail_configure {
            return Err(EncoderError::Configure("profile not supported".into()));
        }
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, EncoderError> {
        Ok(InputSurface {
            id: 1,
            size: Dimensions::new(720, 1280),
        })
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dequeue_output(&mut self, timeout: Duration) -> Result<Dequeued, EncoderError> {
        let Some(unit) = self.script.get(self.next).cloned() else {
            tokio::time::sleep(timeout).await;
            return Ok(Dequeued::TryAgainLater);
        };

        if let Some(gate) = &self.gate {
            match tokio::time::timeout(timeout, gate.acquire()).await {
                Ok(Ok(permit)) => permit.forget(),
                _ => return Ok(Dequeued::TryAgainLater),
            }
        }

        self.next += 1;
        let size = unit.payload.len();
        self.in_flight = Some(unit.payload);
        Ok(Dequeued::Buffer(BufferInfo {
            index: 0,
            offset: 0,
            size,
            presentation_time_us: unit.timestamp_us,
            flags: unit.flags,
        }))
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        (index == 0).then_some(self.in_flight.as_deref()).flatten()
    }

    fn release_output_buffer(&mut self, _index: usize) -> Result<(), EncoderError> {
        self.in_flight = None;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EncoderError> {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedSource {
    counters: Arc<Counters>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn attach(
        &mut self,
        _surface: InputSurface,
        _display: DisplayInfo,
    ) -> Result<(), EncoderError> {
        self.counters.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn detach(&mut self) -> Result<(), EncoderError> {
        self.counters.detached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── TestAgent ────────────────────────────────────────────────────

/// Listener, lifecycle controller and session manager running in-process.
pub struct TestAgent {
    pub manager: Arc<SessionManager>,
    pub endpoint: Endpoint,
    pub lifecycle: LifecycleHandle,
    pub shutdown: CancellationToken,
    listener: JoinHandle<()>,
}

impl TestAgent {
    /// Start an agent on `endpoint` and grant capture.
    pub async fn start(backend: Arc<dyn CaptureBackend>, endpoint: Endpoint) -> Self {
        let manager = Arc::new(SessionManager::new(
            SessionConfig {
                handshake_timeout: Duration::from_millis(500),
                ..SessionConfig::default()
            },
            DeviceDescriptor::new(DEVICE).unwrap(),
            CaptureEncoder::new(backend, EncoderConfig::default()),
        ));
        let shutdown = CancellationToken::new();

        let (controller, lifecycle) =
            LifecycleController::new(Arc::clone(&manager), shutdown.clone());
        tokio::spawn(controller.run());

        let listener = ConnectionListener::bind(&endpoint).await.unwrap();
        let endpoint = listener.local_endpoint().clone();
        let listener = tokio::spawn(listener.run(Arc::clone(&manager), shutdown.clone()));

        let agent = Self {
            manager,
            endpoint,
            lifecycle,
            shutdown,
            listener,
        };
        agent.grant().await;
        agent
    }

    pub async fn start_tcp(backend: Arc<dyn CaptureBackend>) -> Self {
        Self::start(backend, "tcp:127.0.0.1:0".parse().unwrap()).await
    }

    pub async fn grant(&self) {
        self.lifecycle
            .grant(AuthorizationGrant::granted(AuthorizationToken::new(
                &b"token"[..],
                &b"data"[..],
            )))
            .await
            .unwrap();
        self.wait_for(|s| !s.is_idle()).await;
    }

    /// Wait until the published state satisfies `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&SessionState) -> bool) -> SessionState {
        let mut rx: watch::Receiver<SessionState> = self.manager.subscribe();
        let state = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for session state")
            .expect("status channel closed");
        state.clone()
    }

    /// Shut down through the lifecycle channel and wait for the listener.
    pub async fn stop(self) {
        self.lifecycle.shutdown().await.unwrap();
        tokio::time::timeout(WAIT, self.listener)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}

/// The exact bytes a client sees after sending the magic.
pub fn descriptor_reply() -> Vec<u8> {
    let mut reply = DEVICE.as_bytes().to_vec();
    reply.push(0);
    reply
}

/// The exact bytes of one frame on the wire.
pub fn frame_bytes(timestamp_us: i64, payload: &[u8]) -> Vec<u8> {
    let mut frame = timestamp_us.to_be_bytes().to_vec();
    frame.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

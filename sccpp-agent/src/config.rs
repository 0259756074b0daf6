//! Configuration for the mirroring agent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sccpp_core::encoder::EncoderConfig;
use sccpp_core::{DeviceDescriptor, Dimensions, DisplayInfo, Endpoint, MirrorError};
use sccpp_core::{SessionConfig, SyntheticConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Where clients connect.
    pub listener: ListenerConfig,
    /// Identity sent in the handshake.
    pub device: DeviceConfig,
    /// Fixed encoder parameters.
    pub encoder: EncoderConfig,
    /// Per-session deadlines.
    pub session: SessionTimeouts,
    /// Capture backend selection.
    pub capture: CaptureConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// `abstract:<name>`, `unix:<path>` or `tcp:<ip:port>`.
    pub endpoint: Endpoint,
}

/// Device identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Descriptor sent to clients. Empty means detect from the host.
    pub name: String,
}

/// Session deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimeouts {
    /// Time a new connection has to send the magic.
    pub handshake_timeout_ms: u64,
    /// Bounded wait on the encoder per streaming poll, in microseconds.
    pub poll_interval_us: u64,
    /// Deadline for writing one frame.
    pub write_timeout_ms: u64,
    /// Deadline for attaching the capture surface.
    pub attach_timeout_ms: u64,
    /// Budget for each teardown step.
    pub teardown_timeout_ms: u64,
}

/// Capture backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Backend name. Only "synthetic" is built in.
    pub backend: String,
    /// Display width reported by the synthetic backend.
    pub width: u32,
    /// Display height reported by the synthetic backend.
    pub height: u32,
    pub dpi: u32,
    /// Time between synthetic pictures.
    pub frame_interval_ms: u64,
    /// End the stream after this many pictures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_limit: Option<u64>,
    /// Authorize capture at startup instead of waiting for a grant.
    pub auto_grant: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            poll_interval_us: 1_000,
            write_timeout_ms: 5_000,
            attach_timeout_ms: 2_000,
            teardown_timeout_ms: 500,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: "synthetic".into(),
            width: 1080,
            height: 2340,
            dpi: 420,
            frame_interval_ms: 40,
            frame_limit: None,
            auto_grant: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert the timeouts into a `SessionConfig`.
    pub fn to_session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms.max(1)),
            poll_interval: Duration::from_micros(s.poll_interval_us.max(1)),
            write_timeout: Duration::from_millis(s.write_timeout_ms.max(1)),
            teardown_timeout: Duration::from_millis(s.teardown_timeout_ms.max(1)),
        }
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.session.attach_timeout_ms.max(1))
    }

    /// Settings for the built-in synthetic backend.
    pub fn to_synthetic_config(&self) -> SyntheticConfig {
        let c = &self.capture;
        SyntheticConfig {
            display: DisplayInfo {
                size: Dimensions::new(c.width, c.height),
                dpi: c.dpi,
            },
            frame_interval: Duration::from_millis(c.frame_interval_ms.max(1)),
            frame_limit: c.frame_limit,
        }
    }

    /// The descriptor to announce, detecting the host name when unset.
    pub fn descriptor(&self) -> Result<DeviceDescriptor, MirrorError> {
        if self.device.name.is_empty() {
            DeviceDescriptor::new(detect_device_name())
        } else {
            DeviceDescriptor::new(self.device.name.clone())
        }
    }
}

/// Best-effort model or host name.
fn detect_device_name() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && name.len() <= DeviceDescriptor::MAX_LEN)
        .unwrap_or_else(|| "sccpp-device".to_string())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = AgentConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("endpoint = \"abstract:sccpp\""));
        assert!(text.contains("bitrate"));
        assert!(text.contains("handshake_timeout_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = AgentConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AgentConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.listener.endpoint, Endpoint::default());
        assert_eq!(parsed.encoder, EncoderConfig::default());
        assert_eq!(parsed.capture.frame_interval_ms, 40);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: AgentConfig = toml::from_str(
            r#"
            [listener]
            endpoint = "tcp:127.0.0.1:27183"

            [encoder]
            bitrate = 8000000
            level = "4.1"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.listener.endpoint,
            Endpoint::Tcp("127.0.0.1:27183".parse().unwrap())
        );
        assert_eq!(parsed.encoder.bitrate, 8_000_000);
        assert_eq!(parsed.encoder.level, sccpp_core::encoder::AvcLevel::Level41);
        assert_eq!(parsed.encoder.frame_rate, 30);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn bad_endpoint_is_rejected() {
        let parsed: Result<AgentConfig, _> = toml::from_str(
            r#"
            [listener]
            endpoint = "udp:nope"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn load_falls_back_on_missing_or_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = AgentConfig::load(&dir.path().join("absent.toml"));
        assert_eq!(missing.capture.backend, "synthetic");

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[listener\nendpoint = 3").unwrap();
        assert_eq!(AgentConfig::load(&broken).logging.level, "info");
    }

    #[test]
    fn write_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        AgentConfig::write_default(&path).unwrap();
        let loaded = AgentConfig::load(&path);
        assert_eq!(loaded.session.handshake_timeout_ms, 5_000);
    }

    #[test]
    fn timeouts_convert_and_never_hit_zero() {
        let mut cfg = AgentConfig::default();
        let session = cfg.to_session_config();
        assert_eq!(session.handshake_timeout, Duration::from_secs(5));
        assert_eq!(session.poll_interval, Duration::from_millis(1));

        cfg.session.poll_interval_us = 0;
        assert_eq!(cfg.to_session_config().poll_interval, Duration::from_micros(1));
    }

    #[test]
    fn descriptor_uses_configured_name_or_detects_one() {
        let mut cfg = AgentConfig::default();
        cfg.device.name = "Pixel 7".into();
        assert_eq!(cfg.descriptor().unwrap().as_str(), "Pixel 7");

        cfg.device.name.clear();
        assert!(!cfg.descriptor().unwrap().as_str().is_empty());

        cfg.device.name = "a\0b".into();
        assert!(cfg.descriptor().is_err());
    }
}

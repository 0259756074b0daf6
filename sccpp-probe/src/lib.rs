//! # sccpp-probe: Host-side Stream Probe
//!
//! Runs on the **host**. Connects to `sccpp-agent` (usually through
//! `adb forward tcp:27183 localabstract:sccpp`), performs the handshake,
//! records the H.264 elementary stream to an Annex-B file and reports
//! frame statistics.

pub mod config;
pub mod connection;
pub mod recorder;

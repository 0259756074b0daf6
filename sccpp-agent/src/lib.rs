//! # sccpp-agent: Screen Mirroring Agent
//!
//! Device-resident service that captures the display, encodes it to an
//! H.264 elementary stream and serves it to one controller at a time over
//! a local socket (by default the abstract socket `sccpp`, reachable from a
//! host through `adb forward tcp:<port> localabstract:sccpp`).
//!
//! ## Modes
//!
//! - **Serve**: bind the endpoint and stream until Ctrl-C.
//! - **Capabilities**: print the encoder's capability report as JSON.
//! - **Gen-config**: print the default configuration.

pub mod config;
pub mod service;

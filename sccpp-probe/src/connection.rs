//! Connection to the agent.
//!
//! Opens the configured endpoint and performs the magic exchange; what
//! comes back is a [`MirrorClient`] positioned at the first frame.

use tracing::info;

use sccpp_core::{BoxedConnection, MirrorClient, MirrorError};

use crate::config::ProbeConfig;

pub type AgentConnection = MirrorClient<BoxedConnection>;

/// Connect to the agent and read its descriptor.
pub async fn connect(config: &ProbeConfig) -> Result<AgentConnection, MirrorError> {
    let endpoint = &config.network.endpoint;
    info!("connecting to agent at {endpoint}");

    let client = MirrorClient::connect(endpoint, config.timeout()).await?;
    info!(device = client.descriptor(), "connected");
    Ok(client)
}

//! sccpp agent: entry point.
//!
//! ```text
//! sccpp-agent                         Serve on the configured endpoint
//! sccpp-agent --config <path>         Load a custom config TOML
//! sccpp-agent --endpoint tcp:0.0.0.0:27183
//! sccpp-agent --print-capabilities    Dump the encoder report as JSON
//! sccpp-agent --gen-config            Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sccpp_agent::config::AgentConfig;
use sccpp_agent::service::MirrorAgent;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sccpp-agent", about = "sccpp screen-mirroring agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "sccpp-agent.toml")]
    config: PathBuf,

    /// Override the listening endpoint (abstract:<name>, unix:<path>, tcp:<addr>).
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Override the device descriptor sent to clients.
    #[arg(long)]
    device_name: Option<String>,

    /// Print the encoder capability report as JSON and exit.
    #[arg(long)]
    print_capabilities: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = AgentConfig::load(&cli.config);
    if let Some(endpoint) = &cli.endpoint {
        config.listener.endpoint = endpoint.parse()?;
    }
    if let Some(name) = cli.device_name {
        config.device.name = name;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let agent = MirrorAgent::new(config.clone())?;

    if cli.print_capabilities {
        let caps = agent.capabilities()?;
        println!("{}", serde_json::to_string_pretty(&caps)?);
        return Ok(());
    }

    info!("sccpp-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("endpoint: {}", config.listener.endpoint);
    info!(
        "encoder: {} @ {} bit/s, {} fps",
        config.encoder.mime, config.encoder.bitrate, config.encoder.frame_rate
    );

    // Ctrl-C handler.
    let lifecycle = agent.lifecycle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        if let Err(e) = lifecycle.shutdown().await {
            error!("could not deliver shutdown: {e}");
        }
    });

    agent.run().await?;

    Ok(())
}

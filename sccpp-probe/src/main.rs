//! sccpp probe: entry point.
//!
//! ```text
//! sccpp-probe                          Connect with defaults
//! sccpp-probe --endpoint tcp:127.0.0.1:27183 --output screen.h264
//! sccpp-probe --max-frames 100         Stop after 100 frames
//! sccpp-probe --config <path>          Use custom config TOML
//! sccpp-probe --gen-config             Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sccpp_probe::config::ProbeConfig;
use sccpp_probe::connection;
use sccpp_probe::recorder;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sccpp-probe", about = "Record the stream of an sccpp agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "sccpp-probe.toml")]
    config: PathBuf,

    /// Agent endpoint (overrides config). Example: tcp:127.0.0.1:27183
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Output file for the Annex-B stream (overrides config).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after this many frames (overrides config).
    #[arg(long)]
    max_frames: Option<u64>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ProbeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ProbeConfig::load(&cli.config);
    if let Some(endpoint) = cli.endpoint {
        config.network.endpoint = endpoint.parse()?;
    }
    if let Some(path) = cli.output {
        config.output.path = path;
    }
    if cli.max_frames.is_some() {
        config.output.max_frames = cli.max_frames;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("sccpp-probe v{}", env!("CARGO_PKG_VERSION"));

    let mut client = connection::connect(&config).await?;

    let file = tokio::fs::File::create(&config.output.path).await?;
    let mut sink = BufWriter::new(file);
    info!("recording to {}", config.output.path.display());

    // Ctrl-C ends the recording cleanly.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, stopping");
        cancel_clone.cancel();
    });

    let stats = recorder::record(&mut client, &mut sink, config.output.max_frames, &cancel).await?;
    info!(device = client.descriptor(), "recorded {stats}");

    Ok(())
}

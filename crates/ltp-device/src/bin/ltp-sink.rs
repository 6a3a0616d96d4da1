//! Virtual LED display: receives LTP pixel streams and renders them.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ltp_device::{Sink, SinkConfig, StatsRenderer};
use ltp_wire::ColorFormat;

#[derive(Parser, Debug)]
#[command(name = "ltp-sink", about = "LTP sink - virtual LED display receiver")]
struct Args {
    /// Device name.
    #[arg(long, short, default_value = "LTP Sink")]
    name: String,

    /// Device description.
    #[arg(long, default_value = "")]
    description: String,

    /// Stable device UUID; generated when omitted.
    #[arg(long)]
    device_id: Option<Uuid>,

    /// Display dimensions: "60" for a strip, "16x16" for a matrix.
    #[arg(long, default_value = "60")]
    dimensions: String,

    /// Pixel color format.
    #[arg(long, default_value = "rgb")]
    color_format: String,

    /// Maximum refresh rate in Hz.
    #[arg(long, default_value_t = 60)]
    max_refresh: u32,

    /// TCP control port (0 = auto).
    #[arg(long, default_value_t = 0)]
    control_port: u16,

    /// UDP data port (0 = auto).
    #[arg(long, default_value_t = 0)]
    data_port: u16,

    /// Skip mDNS advertisement.
    #[arg(long)]
    no_advertise: bool,

    /// Verbose logging.
    #[arg(long, short)]
    verbose: bool,

    /// Debug logging.
    #[arg(long)]
    debug: bool,
}

fn init_logging(verbose: bool, debug: bool) {
    let default = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_dimensions(value: &str) -> anyhow::Result<Vec<u32>> {
    let dims: Result<Vec<u32>, _> = value.split('x').map(str::parse).collect();
    let dims = dims.with_context(|| format!("invalid dimensions: {value}"))?;
    anyhow::ensure!(
        !dims.is_empty() && dims.len() <= 2 && dims.iter().all(|&d| d > 0),
        "invalid dimensions: {value}"
    );
    Ok(dims)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.debug);

    let dimensions = parse_dimensions(&args.dimensions)?;
    let color_format = ColorFormat::from_name(&args.color_format)
        .with_context(|| format!("unknown color format: {}", args.color_format))?;

    let config = SinkConfig {
        device_id: args.device_id.unwrap_or_else(Uuid::new_v4),
        name: args.name,
        description: args.description,
        dimensions,
        color_format,
        max_refresh_hz: args.max_refresh,
        control_port: args.control_port,
        data_port: args.data_port,
        advertise: !args.no_advertise,
        ..SinkConfig::default()
    };

    let mut sink = Sink::new(config, Box::new(StatsRenderer::new(300)))?;
    sink.start().await?;

    wait_for_shutdown().await;
    info!("shutting down");
    sink.stop().await;
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

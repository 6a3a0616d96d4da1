//! LTP controller daemon: discovers sources and sinks and routes between
//! them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ltp_router::admin::AdminHandler;
use ltp_router::{Controller, ControllerConfig, ControllerFileConfig, RoutingEngine};
use ltp_transport::ControlServer;

#[derive(Parser, Debug)]
#[command(
    name = "ltp-controller",
    about = "LTP controller - discovery and routing"
)]
struct Args {
    /// Path to a YAML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Controller service name.
    #[arg(long, default_value = "ltp-controller")]
    name: String,

    /// Human-readable display name.
    #[arg(long, default_value = "LTP Controller")]
    display_name: String,

    /// Stable device UUID; generated when omitted.
    #[arg(long)]
    device_id: Option<Uuid>,

    /// TCP control port (0 = auto).
    #[arg(long, default_value_t = 0)]
    control_port: u16,

    /// Health check interval in seconds.
    #[arg(long, default_value_t = 30)]
    health_interval: u64,

    /// Skip mDNS advertisement and browsing.
    #[arg(long)]
    no_mdns: bool,

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.debug);

    let file_config = match &args.config {
        Some(path) => {
            ControllerFileConfig::load(path).context("failed to load configuration")?
        }
        None => ControllerFileConfig::default(),
    };

    let mut config = ControllerConfig {
        name: args.name,
        display_name: args.display_name,
        device_id: args.device_id.unwrap_or_else(Uuid::new_v4),
        health_check_interval: Duration::from_secs(args.health_interval.max(1)),
        advertise: !args.no_mdns,
        browse: !args.no_mdns,
        ..ControllerConfig::default()
    };
    file_config.apply_to(&mut config);

    let controller = Arc::new(Controller::new(config));
    let engine = RoutingEngine::new(controller.clone());

    let control_port = file_config.control_port.unwrap_or(args.control_port);
    let server = ControlServer::bind(
        "0.0.0.0",
        control_port,
        Arc::new(AdminHandler::new(controller.clone(), engine.clone())),
    )
    .await
    .context("failed to bind control server")?;

    controller.start(server.local_port())?;

    for failure in file_config.install(&engine) {
        warn!(error = %failure, "config entry skipped");
    }
    engine.start();

    info!(
        control_port = server.local_port(),
        routes = engine.routes().len(),
        "controller running"
    );

    wait_for_shutdown().await;
    info!("shutting down");
    engine.stop().await;
    controller.stop();
    server.stop();
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

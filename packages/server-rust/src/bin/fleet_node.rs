//! `fleet-node`: boots the services declared in a configuration file and
//! runs them until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use fleet_server::logging::init_tracing;
use fleet_server::network::{ApiService, API_SERVICE};
use fleet_server::service::{Orchestrator, ServiceCatalog};
use fleet_server::{telemetry, FleetConfig};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "fleet-node", version, about = "Boot and run a fleet node")]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, env = "FLEET_CONFIG")]
    config: PathBuf,

    /// Overrides `logging.level` from the configuration.
    #[arg(long, env = "FLEET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "FLEET_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

fn catalog() -> ServiceCatalog {
    ServiceCatalog::new().with(API_SERVICE, ApiService::new)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = FleetConfig::from_path(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.log_json;
    init_tracing(&config.logging);

    if let Some(addr) = cli.metrics_addr {
        telemetry::install_exporter(addr)?;
    }

    info!(config = %cli.config.display(), services = config.services.len(), "starting fleet node");
    let mut node = Orchestrator::new(config, catalog());

    let report = match node.start().await {
        Ok(report) => report,
        Err(err) => {
            error!(error = %format!("{err:#}"), "startup failed");
            node.shutdown().await;
            return Err(err.into());
        }
    };
    for failure in &report.failures {
        warn!(service = %failure.service, phase = %failure.phase, "running without service");
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    node.shutdown().await;
    Ok(())
}

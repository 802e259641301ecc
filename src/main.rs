//! ChargeGrid CSMS
//!
//! OCPP 1.6 WebSocket endpoint in front of the charging core.
//! Reads configuration from TOML (~/.config/chargegrid-csms/config.toml).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use chargegrid::application::services::HeartbeatMonitor;
use chargegrid::infrastructure::{InMemoryDirectory, SeedData};
use chargegrid::interfaces::ws::OcppServer;
use chargegrid::support::logging::init_tracing;
use chargegrid::support::{listen_for_shutdown_signals, ShutdownSignal};
use chargegrid::{default_config_path, AppConfig, ChargingCore};

#[derive(Debug, Parser)]
#[command(name = "chargegrid-csms", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "CHARGEGRID_CONFIG")]
    config: Option<PathBuf>,

    /// Stations, tariffs and users to load at start-up
    #[arg(long, env = "CHARGEGRID_SEED")]
    seed: Option<PathBuf>,

    /// Override the WebSocket port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the log level
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = AppConfig::load(&config_path)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    if cli.check {
        println!("{}: ok", config_path.display());
        return Ok(());
    }

    init_tracing(&config.logging);
    info!(path = %config_path.display(), "Starting ChargeGrid CSMS");

    // Metrics
    if config.metrics.enabled {
        let listen: std::net::SocketAddr = config.metrics.listen.parse()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(listen)
            .install()?;
        info!(%listen, "Prometheus exporter listening");
    }

    // Core
    let directory = Arc::new(InMemoryDirectory::new());
    let core = Arc::new(ChargingCore::new(&config, directory.clone()));
    match cli.seed {
        Some(path) => {
            SeedData::load(&path)?.apply(&core, &directory)?;
            info!(path = %path.display(), "Provisioning file loaded");
        }
        None => warn!("No provisioning file given, every station will be refused"),
    }

    let shutdown = ShutdownSignal::new();
    tokio::spawn(listen_for_shutdown_signals(shutdown.clone()));

    let monitor = HeartbeatMonitor::new(
        core.clone(),
        Duration::from_secs(config.heartbeat.check_interval_secs),
    );
    let monitor_task = monitor.start(shutdown.clone());

    // OCPP endpoint
    let server = OcppServer::new(config.server.clone(), core.clone(), shutdown.clone());
    if let Err(e) = server.run().await {
        error!(error = %e, "WebSocket server error");
        shutdown.trigger();
    }

    if let Err(e) = monitor_task.await {
        warn!(error = %e, "Heartbeat monitor task failed");
    }
    info!("ChargeGrid CSMS shutdown complete");
    Ok(())
}

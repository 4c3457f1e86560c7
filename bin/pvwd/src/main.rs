//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the PV-Watch daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pvw_aggregator::TelemetryAggregator;
use pvw_api::{spawn_api_server, ApiServer, ApiState};
use pvw_common::{init_stderr, init_tracing, AppConfig};
use pvw_metrics::{
    new_registry, spawn_http_server, DaemonMetrics, DashboardMetrics, SharedRegistry,
    SimulationMetrics,
};
use pvw_supervisor::{SimulationCommand, SimulationSupervisor};
use tokio::signal;
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("PV-Watch ", env!("CARGO_PKG_VERSION")),
    about = "PV-Watch dashboard daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        env = "PVW_DATA_DIR",
        help = "Override the directory holding the event log and status file"
    )]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the dashboard API and supervise the simulation")]
    Run,
    #[command(about = "Print the current dashboard snapshot as JSON")]
    Snapshot,
    #[command(about = "Print the recent-history window as JSON")]
    Window,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/pvwd.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("pvwd", &config.logging)?;
            match &loaded.source {
                Some(path) => info!(config_path = %path.display(), "configuration loaded"),
                None => info!("no configuration file found; running with defaults"),
            }
            run_daemon(config).await?
        }
        Commands::Snapshot => {
            init_stderr("warn");
            let aggregator = TelemetryAggregator::new(&config.storage, None);
            println!("{}", serde_json::to_string_pretty(&aggregator.snapshot())?);
        }
        Commands::Window => {
            init_stderr("warn");
            let aggregator = TelemetryAggregator::new(&config.storage, None);
            println!(
                "{}",
                serde_json::to_string_pretty(&aggregator.recent_window())?
            );
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.record_start(VERSION);

    fs::create_dir_all(&config.storage.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.storage.data_dir.display()
        )
    })?;

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let (aggregator, supervisor) = build_components(&config, &registry)?;

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let static_dir = config.api.static_dir.clone().and_then(|dir| {
            if dir.is_dir() {
                Some(dir)
            } else {
                warn!(
                    static_dir = %dir.display(),
                    "api static_dir not found; serving API without assets"
                );
                None
            }
        });
        let state = Arc::new(ApiState::new(
            aggregator,
            supervisor.clone(),
            VERSION,
            config.api.poll_interval,
        ));
        match spawn_api_server(state, config.api.listen, static_dir) {
            Ok(server) => {
                info!(address = %server.addr(), "api server listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!(
        event_log = %config.storage.event_log_path().display(),
        status_file = %config.storage.status_path().display(),
        "daemon running; waiting for termination signal"
    );
    shutdown_signal().await;
    info!("termination signal received; shutting down");

    if supervisor.is_running() {
        let outcome = supervisor.stop();
        info!(message = %outcome.message, "simulation stopped for shutdown");
    }

    if let Some(server) = api_server {
        server.shutdown().await?;
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

fn build_components(
    config: &AppConfig,
    registry: &SharedRegistry,
) -> Result<(Arc<TelemetryAggregator>, SimulationSupervisor)> {
    let dashboard_metrics = DashboardMetrics::new(registry.clone())?;
    let simulation_metrics = SimulationMetrics::new(registry.clone())?;

    let aggregator = Arc::new(TelemetryAggregator::new(
        &config.storage,
        Some(dashboard_metrics),
    ));
    let command = SimulationCommand::from_config(&config.simulation, &config.storage);
    info!(
        program = %command.program().display(),
        args = ?command.get_args(),
        "simulation command configured"
    );
    let supervisor = SimulationSupervisor::new(
        command,
        config.simulation.output_lines,
        Some(simulation_metrics),
    );
    Ok((aggregator, supervisor))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => warn!(?err, "failed to install SIGTERM handler"),
    }
}

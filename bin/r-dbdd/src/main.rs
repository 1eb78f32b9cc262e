//! ---
//! dbd_section: "01-core-functionality"
//! dbd_subsection: "binary"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Binary entrypoint for the R-DBD daemon."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
mod services;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use r_dbd_common::config::{DbdConfig, Mode};
use r_dbd_common::logging::init_tracing;
use r_dbd_metrics::{new_registry, spawn_http_server, DaemonMetrics, FailoverMetrics, SharedRegistry};
use r_dbd_redundancy::{
    FailoverController, FailoverSettings, MonitorAddress, Role, SharedRole,
};
use r_dbd_rt::ShutdownSignal;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::services::{ActiveServices, ServiceHooks, ServiceSettings};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "R-DBD accounting daemon with active/standby failover",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the configured mode")]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Primary,
    Backup,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Primary => Mode::Primary,
            CliMode::Backup => Mode::Backup,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the daemon")]
    Run,
    #[command(about = "Load and validate configuration, then print the effective settings")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/r-dbdd.toml"));

    let load_started = Instant::now();
    let loaded_config = DbdConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let config_path = loaded_config.source;
    let load_duration = load_started.elapsed();

    if let Some(mode) = cli.mode {
        config.mode = mode.into();
        config.validate()?;
    }

    if let Some(Commands::CheckConfig) = cli.command {
        let rendered =
            toml::to_string_pretty(&config).context("failed to render effective configuration")?;
        println!("# source: {}\n{}", config_path.display(), rendered);
        return Ok(());
    }

    init_tracing("r-dbdd", &config.logging)?;
    info!(config_path = %config_path.display(), mode = ?config.mode, "configuration loaded");

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();

    run_daemon(config, metrics_registry, daemon_metrics).await
}

async fn run_daemon(
    config: DbdConfig,
    metrics_registry: SharedRegistry,
    daemon_metrics: DaemonMetrics,
) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(metrics_registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let shutdown = ShutdownSignal::new();
    let signal_listener = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("ctrl-c received; shutting down"),
                Err(err) => warn!(error = %err, "failed to listen for ctrl-c; shutting down"),
            }
            shutdown.trigger();
        })
    };

    let outcome = match config.mode {
        Mode::Primary => run_primary(&config, &shutdown, daemon_metrics).await,
        Mode::Backup => {
            let failover_metrics = if config.metrics.enabled {
                Some(FailoverMetrics::new(metrics_registry)?)
            } else {
                None
            };
            run_backup(&config, &shutdown, daemon_metrics, failover_metrics).await
        }
    };
    signal_listener.abort();

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    outcome
}

/// The primary holds the active role from the start until shutdown.
async fn run_primary(
    config: &DbdConfig,
    shutdown: &ShutdownSignal,
    daemon_metrics: DaemonMetrics,
) -> Result<()> {
    let role = SharedRole::new(Role::Active);
    let wake = Arc::new(Notify::new());
    let hooks = ServiceHooks::new(wake.clone());
    let services = ActiveServices::start(
        ServiceSettings::from_config(config),
        role,
        wake,
        &hooks,
        Some(daemon_metrics),
    )
    .await?;

    info!("primary running; waiting for termination signal");
    shutdown.wait().await;
    services.stop().await;
    Ok(())
}

/// The backup watches the primary, takes over when it disappears, and keeps
/// watching so it can hand control back when the primary returns.
async fn run_backup(
    config: &DbdConfig,
    shutdown: &ShutdownSignal,
    daemon_metrics: DaemonMetrics,
    failover_metrics: Option<FailoverMetrics>,
) -> Result<()> {
    let role = SharedRole::new(Role::Standby);
    let wake = Arc::new(Notify::new());
    let hooks = Arc::new(ServiceHooks::new(wake.clone()));
    let address = MonitorAddress::new(config.backup.primary_host.clone(), config.backup.primary_port);
    let mut controller = FailoverController::new(
        address,
        FailoverSettings::from_config(&config.backup),
        role.clone(),
        shutdown.clone(),
        hooks.clone(),
    );
    if let Some(metrics) = failover_metrics {
        controller = controller.with_metrics(metrics);
    }

    let settings = ServiceSettings::from_config(config);
    let mut services: Option<ActiveServices> = None;
    loop {
        controller.run().await;
        if shutdown.is_triggered() {
            break;
        }
        // Returning without shutdown means this instance was promoted. A group
        // left over from an earlier term has already been wound down by the
        // demotion hooks; reap it before starting a fresh one.
        if let Some(previous) = services.take() {
            previous.stop().await;
        }
        services = Some(
            ActiveServices::start(
                settings,
                role.clone(),
                wake.clone(),
                &hooks,
                Some(daemon_metrics.clone()),
            )
            .await
            .context("failed to start active services after promotion")?,
        );
    }

    if let Some(current) = services.take() {
        current.stop().await;
    }
    info!(role = %role.get(), "backup stopped");
    Ok(())
}

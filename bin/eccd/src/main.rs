//! ---
//! ecc_section: "06-daemon"
//! ecc_subsection: "binary"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Binary entrypoint for the equipment control center daemon."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
mod api;
mod daemon;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ecc_common::config::AppConfig;
use ecc_common::logging::init_tracing;
use ecc_metrics::{new_registry, spawn_http_server, DaemonMetrics};
use tokio::signal;
use tracing::{info, warn};

use crate::api::ApiServer;
use crate::daemon::Daemon;

#[derive(Debug, Parser)]
#[command(author, version, about = "Equipment control center daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Host the configured services and serve the API")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/eccd.toml"));
    candidates.push(PathBuf::from("/etc/ecc/eccd.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            println!(
                "Configuration OK: {} ({} service(s))",
                loaded.source.display(),
                loaded.config.services.len()
            );
            Ok(())
        }
        Commands::Run => {
            init_tracing("eccd", &loaded.config.logging)?;
            info!(config_path = %loaded.source.display(), "configuration loaded");

            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.inc_start();
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), build_profile());
            run_daemon(loaded.config, registry, daemon_metrics).await
        }
    }
}

async fn run_daemon(
    config: AppConfig,
    registry: ecc_metrics::SharedRegistry,
    daemon_metrics: DaemonMetrics,
) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let api_settings = config.api.clone();

    let metrics_server = if metrics_settings.enabled {
        info!(address = %metrics_settings.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), metrics_settings.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let daemon = Daemon::start(config, Some(registry))?;
    daemon_metrics.set_hosted_services(daemon.hosted().len());

    let api_server = if api_settings.enabled {
        match ApiServer::spawn(Arc::new(daemon.api_state()), api_settings.listen).await {
            Ok(server) => Some(server),
            Err(err) => {
                warn!(error = %err, "failed to start api server");
                None
            }
        }
    } else {
        info!("api server disabled by configuration");
        None
    };

    info!("daemon running; waiting for termination signal");
    shutdown_signal().await;
    info!(
        known_services = daemon.registry().len(),
        "termination signal received; shutting down"
    );

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    daemon.shutdown().await;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
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
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

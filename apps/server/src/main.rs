//! Nearcast Server - standalone server for proximity broadcasting.
//!
//! Runs the broadcast API and the live notification stream as a
//! background daemon. Authentication is expected to happen upstream.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nearcast_core::{bind, bootstrap_services, start_server};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Nearcast Server - proximity-aware track broadcasting.
#[derive(Parser, Debug)]
#[command(name = "nearcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "NEARCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "NEARCAST_BIND_PORT")]
    port: Option<u16>,

    /// Data directory for the broadcast journal.
    #[arg(short = 'd', long, env = "NEARCAST_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Nearcast Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    log::info!(
        "Configuration: bind_port={}, data_dir={}",
        config.bind_port,
        config
            .data_dir
            .as_ref()
            .map_or_else(|| "none".to_string(), |d| d.display().to_string())
    );

    let core_config = config.to_core_config()?;
    let services = bootstrap_services(&core_config).context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    services.start_background_tasks();

    let app_state = services.app_state().context("Failed to build app state")?;
    let listener = bind(&core_config)
        .await
        .with_context(|| format!("Failed to bind port {}", core_config.preferred_port))?;

    let server_shutdown = CancellationToken::new();
    let server_handle = tokio::spawn(start_server(
        app_state,
        listener,
        server_shutdown.clone(),
    ));

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    // Closing live streams lets graceful shutdown finish.
    server_shutdown.cancel();
    services.shutdown();

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Server error: {}", e),
        Err(e) => log::error!("Server task failed: {}", e),
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

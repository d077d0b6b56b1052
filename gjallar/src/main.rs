#![forbid(unsafe_code)]

use clap::Parser;
use gjallar_lib::telemetry::{init_tracing, shutdown_tracing};
use gjallar_lib::{load_from_path, App, ListenerRegistry, NoopCertManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Gjallar multi-protocol HTTP application server")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "gjallar.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.telemetry.logging.level, cfg.telemetry.logging.show_target)
    {
        eprintln!("failed to initialize logging: {err}");
    }

    info!(servers = cfg.servers.len(), "configuration loaded");

    let registry = Arc::new(ListenerRegistry::new());
    let mut app = App::new(cfg, registry, Arc::new(NoopCertManager));

    if let Err(err) = app.provision() {
        error!(%err, "provision failed");
        std::process::exit(1);
    }
    if let Err(err) = app.validate() {
        error!(%err, "validation failed");
        std::process::exit(1);
    }
    if let Err(err) = app.start().await {
        error!(%err, "start failed");
        std::process::exit(1);
    }

    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            error!(%err, "failed to install SIGTERM handler");
            std::process::exit(1);
        }
    };
    let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
        Ok(sig) => sig,
        Err(err) => {
            error!(%err, "failed to install SIGINT handler");
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
    }

    app.stop(true).await;
    shutdown_tracing();
}

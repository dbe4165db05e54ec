//! # herald
//!
//! Herald worker binary: loads settings, connects the bus, and serves the
//! HTTP/`WebSocket` relay until SIGINT or SIGTERM, then drains.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use herald_core::logging::{init_subscriber, worker_span};
use herald_server::metrics::install_recorder;
use herald_server::{HeraldServer, ServerConfig, Worker};
use herald_settings::{HeraldSettings, load_settings_from_path, settings_path};
use tracing::Instrument;

/// Upper bound on waiting for the HTTP task after the drain.
const SERVE_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Herald notification relay.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "Real-time notification relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$HERALD_CONFIG` or `./herald.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn settings_file(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(settings_path)
    }

    /// Settings from file and env, with CLI flags on top.
    fn load(&self) -> Result<HeraldSettings> {
        let path = self.settings_file();
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load()?;

    init_subscriber(&settings.logging.level, settings.logging.format);
    let span = worker_span(&settings.logging.service_name);
    run(settings).instrument(span).await
}

async fn run(settings: HeraldSettings) -> Result<()> {
    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    let config = ServerConfig::from_settings(&settings);
    let bus = herald_bus::build_bus(&settings.bus).context("Failed to build pub/sub bus")?;
    let worker = Worker::new(bus, config.clone());
    worker.start().await;

    let server = HeraldServer::new(config, worker.registry(), metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Herald listening on http://{addr}");

    wait_for_signal().await?;

    tracing::info!("Shutting down...");
    let outcome = worker.stop().await;
    server.stop();
    if tokio::time::timeout(SERVE_EXIT_TIMEOUT, handle).await.is_err() {
        tracing::warn!("http server did not stop in time");
    }

    tracing::info!(?outcome, "Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
        _ = term.recv() => tracing::info!("received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}

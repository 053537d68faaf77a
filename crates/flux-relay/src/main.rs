//! # flux-relay
//!
//! Binary entry point: consumes domain events from AMQP and relays them to
//! websocket clients grouped by workspace.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use flux_runtime::{AmqpConnector, QueueSupervisor, RelayOrchestrator, ShutdownCoordinator};
use flux_server::FluxServer;
use flux_settings::FluxSettings;
use tracing::{error, info, warn};

/// Real-time event relay.
#[derive(Parser, Debug)]
#[command(name = "flux-relay", version, about = "Real-time event relay")]
struct Cli {
    /// Settings file (defaults to `~/.flux/settings.json`).
    #[arg(long, env = "FLUX_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

fn load(cli: &Cli) -> Result<FluxSettings> {
    let path = cli.config.clone().unwrap_or_else(flux_settings::settings_path);
    let mut settings = flux_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    flux_settings::validate(&settings).context("invalid settings after CLI overrides")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let _ = flux_telemetry::init_logging(&settings.logging);
    let metrics = match flux_telemetry::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let shutdown = ShutdownCoordinator::new();
    let signals = shutdown.listen_for_signals();

    let server = FluxServer::new(
        settings.server.clone(),
        settings.auth.clone(),
        shutdown.token(),
        metrics,
    );
    let handle = server.start().await.context("failed to start server")?;
    info!(addr = %handle.local_addr(), exchange = %settings.amqp.exchange, "flux relay started");

    let orchestrator = Arc::new(RelayOrchestrator::new(Arc::new(server.emitter())));
    let supervisor = QueueSupervisor::new(
        AmqpConnector::new(settings.amqp.clone()),
        orchestrator,
        settings.supervisor.clone(),
        server.queue_status().clone(),
    );
    let mut queue = tokio::spawn(supervisor.run(shutdown.token()));

    // The supervisor only returns on its own when the first connection fails.
    let shutdown_token = shutdown.token();
    let early = tokio::select! {
        () = shutdown_token.cancelled() => None,
        joined = &mut queue => Some(joined),
    };
    let server_task = tokio::spawn(async move {
        if let Err(e) = handle.join().await {
            error!(error = %e, "server ended with error");
        }
    });
    let mut tasks = vec![server_task, signals];

    let result = match early {
        None => {
            tasks.push(tokio::spawn(async move {
                if let Ok(Err(e)) = queue.await {
                    error!(error = %e, "queue supervisor ended with error");
                }
            }));
            Ok(())
        }
        Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(e))) => Err(anyhow::Error::new(e)),
        Some(Err(e)) => Err(anyhow::Error::new(e).context("queue supervisor panicked")),
    };
    if let Err(e) = &result {
        error!(error = %e, "queue supervisor failed, shutting down");
    }

    let budget = Duration::from_secs(settings.supervisor.shutdown_timeout_secs);
    let drained = shutdown.drain(tasks, budget).await;
    if drained {
        info!("flux relay stopped");
    } else {
        warn!("flux relay stopped before all tasks drained");
    }
    result
}

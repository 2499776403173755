//! vuo - VCF Upgrade Orchestrator daemon.
//!
//! Periodically refreshes domain update summaries and capacity, and serves
//! the upgrade control endpoints over HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus_client::registry::Registry;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vuo::metrics::Metrics;
use vuo::server::{self, AppState, HealthState};
use vuo::{
    ApiClient, Config, MemoryTokenStore, Orchestrator, RefreshCache, Refresher, StatusEvent,
    StatusSink, VcfApi,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = match option_env!("BUILD_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};
pub const BUILD_DATE: &str = match option_env!("BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};

#[tokio::main]
async fn main() {
    // Initialize logging
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting vuo v{} (commit: {}, build: {})",
        VERSION, COMMIT, BUILD_DATE
    );

    if let Err(e) = run().await {
        error!("vuo failed: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber with JSON format for production.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .init();

    Ok(())
}

async fn run() -> Result<()> {
    let config = Config::load()?;
    info!(
        base_url = %config.base_url,
        port = config.listen_port,
        refresh_interval = config.refresh_interval,
        capacity_interval = config.capacity_interval,
        "Configuration loaded"
    );

    // Initialize Prometheus metrics
    let mut registry = Registry::default();
    let metrics = Arc::new(Metrics::new(&mut registry));
    let registry = Arc::new(registry);

    let api: Arc<dyn VcfApi> = Arc::new(ApiClient::new(
        &config,
        Arc::new(MemoryTokenStore::new()),
    )?);

    let sink = StatusSink::with_ignore_alerts(config.ignore_alerts_domains.iter().cloned());
    tokio::spawn(log_status_events(sink.subscribe()));

    let orchestrator = Orchestrator::new(api.clone(), sink, config.timings.clone())
        .with_metrics(metrics.clone());
    let refresher = Refresher::new(api, RefreshCache::default(), Some(metrics));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let refresh_task = tokio::spawn(refresher.clone().run(
        Duration::from_secs(config.refresh_interval),
        Duration::from_secs(config.capacity_interval),
        shutdown.clone(),
    ));

    let state = AppState {
        orchestrator: orchestrator.clone(),
        refresher,
        registry,
        health: HealthState::new(),
    };
    server::serve(config.listen_port, state, shutdown.clone()).await?;

    orchestrator.shutdown().await;
    if let Err(e) = refresh_task.await {
        warn!("Refresh loop ended abnormally: {}", e);
    }
    info!("vuo stopped");
    Ok(())
}

/// Forward status sink notifications to the service log.
async fn log_status_events(mut events: broadcast::Receiver<StatusEvent>) {
    loop {
        match events.recv().await {
            Ok(StatusEvent::Phase { domain_id, phase }) => {
                info!(domain = %domain_id, %phase, "Upgrade phase changed");
            }
            Ok(StatusEvent::Log { domain_id, line }) => {
                debug!(domain = %domain_id, "{}", line.trim_end());
            }
            Ok(StatusEvent::IgnoreAlerts { domain_id, enabled }) => {
                info!(domain = %domain_id, enabled, "Ignore-alerts flag changed");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Status event subscriber lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            () = ctrl_c() => {},
            () = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    wait_for(signal::ctrl_c(), "Ctrl+C").await;
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    let term = async {
        signal(SignalKind::terminate())?.recv().await;
        Ok::<(), std::io::Error>(())
    };
    wait_for(term, "SIGTERM").await;
}

/// Resolve once the signal arrives. A handler that fails to install never
/// resolves, leaving shutdown to the other handler.
async fn wait_for(installed: impl Future<Output = std::io::Result<()>>, name: &str) {
    if let Err(err) = installed.await {
        warn!(?err, "Failed to install {} handler", name);
        std::future::pending::<()>().await;
    }
}

//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order (metrics, registry, topologies)
//! - Start background tasks (descriptor watcher, topology service, signals)
//! - Bind the admin and gateway listeners and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: a missing store directory or unbindable address is fatal
//! - A topology that fails to deploy is not fatal; it is reported and skipped
//! - Listeners start last (traffic only when the initial scan has finished)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::setup_admin_router;
use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::topology::{TopologyError, TopologyService, TopologyWatcher};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid {field} '{value}'")]
    Address { field: &'static str, value: String },

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("descriptor watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the gateway until SIGINT/SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address {
                field: "observability.metrics_address",
                value: config.observability.metrics_address.clone(),
            })?;
        metrics::init_metrics(addr)?;
    }

    let topologies = Arc::new(TopologyService::open(&config.gateway)?);
    let registry = topologies.registry();
    for problem in registry.problems() {
        tracing::warn!(problem = %problem, "Service definition skipped");
    }
    tracing::info!(
        definitions = registry.len(),
        services_dir = %config.gateway.services_dir,
        "Service definitions loaded"
    );

    let initial = topologies.reload_topologies().await?;
    for (name, error) in &initial.failed {
        tracing::error!(topology = %name, error = %error, "Topology failed to deploy at startup");
    }

    let shutdown = Arc::new(Shutdown::new());
    let (watcher, events) = TopologyWatcher::new(
        topologies.topology_dir(),
        Duration::from_secs(config.gateway.poll_interval_secs),
    );
    // Keeps the event stream open when file watching is disabled.
    let _sender = watcher.sender();
    let (_watch, rescan_every) = if config.gateway.watch_topologies {
        let period = Duration::from_secs(config.gateway.poll_interval_secs.max(1));
        (Some(watcher.run()?), Some(period))
    } else {
        tracing::info!("Topology file watching disabled; reload via SIGHUP or the admin API");
        (None, None)
    };

    tokio::spawn(Arc::clone(&topologies).run(events, rescan_every, shutdown.subscribe()));
    tokio::spawn(signals::reload_on_hangup(Arc::clone(&topologies), Arc::clone(&shutdown)));
    tokio::spawn(signals::wait_for_shutdown(Arc::clone(&shutdown)));

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(Arc::clone(&topologies), &config.admin.api_key);
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        }))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config, Arc::clone(&topologies));
    let result = server.run(listener, shutdown.subscribe()).await;

    shutdown.trigger();
    if let Some(admin) = admin {
        let _ = admin.await;
    }
    tracing::info!("Shutdown complete");
    Ok(result?)
}

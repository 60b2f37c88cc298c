//! OS signal handling.
//!
//! # Responsibilities
//! - SIGINT / SIGTERM: trigger graceful shutdown
//! - SIGHUP: rescan the topology directory (the management reload signal)
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a reload, never a shutdown

use std::sync::Arc;

use crate::lifecycle::Shutdown;
use crate::topology::TopologyService;

/// Wait for SIGINT or SIGTERM, then trigger `shutdown`.
pub async fn wait_for_shutdown(shutdown: Arc<Shutdown>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "Shutdown signal received"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "Shutdown signal received"),
    }
    shutdown.trigger();
}

/// Reload topologies on every SIGHUP until `shutdown` fires.
#[cfg(unix)]
pub async fn reload_on_hangup(topologies: Arc<TopologyService>, shutdown: Arc<Shutdown>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for SIGHUP");
            return;
        }
    };
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            received = hangups.recv() => {
                if received.is_none() {
                    break;
                }
                tracing::info!(signal = "SIGHUP", "Reloading topologies");
                match topologies.reload_topologies().await {
                    Ok(summary) => tracing::info!(
                        deployed = summary.deployed.len(),
                        failed = summary.failed.len(),
                        removed = summary.removed.len(),
                        unchanged = summary.unchanged,
                        "Topology reload finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Topology reload failed"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn reload_on_hangup(_topologies: Arc<TopologyService>, _shutdown: Arc<Shutdown>) {}

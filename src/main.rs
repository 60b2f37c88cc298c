//! Topology gateway
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   TOPOLOGY GATEWAY                   │
//!   Client request   │  ┌──────────┐   ┌────────────┐   ┌───────────────┐  │
//!  ──────────────────┼─▶│   http   │──▶│  routing   │──▶│   rewrite     │  │
//!  /gateway/<t>/...  │  │ + auth   │   │  context   │   │   inbound     │  │
//!                    │  └──────────┘   └─────▲──────┘   └──────┬────────┘  │
//!                    │                       │ swap            ▼           │
//!                    │  ┌──────────┐   ┌─────┴──────┐   ┌───────────────┐  │   Backend
//!                    │  │ topology │──▶│  deploy    │   │   dispatch    │──┼──▶ cluster
//!                    │  │ watcher  │   │  compiler  │   │  + failover   │  │
//!                    │  └──────────┘   └─────▲──────┘   └──────┬────────┘  │
//!                    │                       │                 ▼           │
//!  Client response   │                ┌──────┴─────┐   ┌───────────────┐  │
//!  ◀─────────────────┼────────────────│  services  │   │   rewrite     │  │
//!                    │                │  registry  │   │   outbound    │  │
//!                    │                └────────────┘   └───────────────┘  │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use topology_gateway::config::load_config;
use topology_gateway::lifecycle;
use topology_gateway::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "topology-gateway")]
#[command(about = "Reverse-proxy gateway with topology-driven routing", long_about = None)]
struct Args {
    /// Gateway configuration file.
    #[arg(short, long, default_value = "conf/gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        mount = %config.gateway.path,
        topology_dir = %config.gateway.topology_dir,
        "topology-gateway starting"
    );

    lifecycle::run(config).await?;
    Ok(())
}

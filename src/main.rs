//! Resilient data-access and session recovery layer.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                     SESSION LAYER                        │
//!   Player        │  ┌───────────┐    ┌──────────────┐    ┌──────────────┐   │
//!   WebSocket ────┼─▶│   http    │───▶│   session    │───▶│  resilience  │───┼──▶ DataStore
//!                 │  │ websocket │    │   registry   │    │    engine    │   │   (get/set/
//!                 │  └───────────┘    └──────────────┘    └──────┬───────┘   │    delete)
//!                 │        │          ┌──────────────┐           │           │
//!                 │        └─────────▶│   snapshot   │───────────┤           │
//!                 │                   │   protocol   │           ▼           │
//!                 │                   └──────────────┘    ┌──────────────┐   │
//!                 │                                       │ fallback     │   │
//!                 │                                       │ cache        │   │
//!                 │                                       └──────────────┘   │
//!                 │  ┌────────────────────────────────────────────────────┐  │
//!                 │  │ config · observability · lifecycle · admin · health │  │
//!                 │  └────────────────────────────────────────────────────┘  │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use resilient_session::config::{load_config, ConfigWatcher, LayerConfig};
use resilient_session::lifecycle::{wait_for_signal, Shutdown};
use resilient_session::observability::{logging, metrics};
use resilient_session::store::MemoryStore;
use resilient_session::{HttpServer, SessionLayer};

#[derive(Parser)]
#[command(name = "resilient-session", version)]
#[command(about = "Circuit-breaker protected data access and single-session player registry")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => LayerConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilient-session starting");
    tracing::info!(
        bind_address = %config.server.bind_address,
        max_connections = config.server.max_connections,
        grace_period_secs = config.session.grace_period_secs,
        operation_timeout_ms = config.operations.timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let layer = Arc::new(SessionLayer::new(Arc::new(MemoryStore::new()), &config));
    let shutdown = Shutdown::new();
    let maintenance = layer.spawn_maintenance(&shutdown);

    // keep the watcher alive for the life of the process
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let layer = layer.clone();
            tokio::spawn(async move {
                while let Some(new_config) = updates.recv().await {
                    layer.reload(&new_config);
                }
            });
            Some(watcher)
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(layer.clone(), &config, shutdown.clone());
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    server.run(listener).await?;

    shutdown.trigger();
    for task in maintenance {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

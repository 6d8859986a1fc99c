//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router (player WebSocket + admin API)
//! - Wire up middleware (tracing)
//! - Serve until the shutdown broadcast, then drain player sockets

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::config::schema::LayerConfig;
use crate::http::websocket::ws_handler;
use crate::layer::SessionLayer;
use crate::lifecycle::Shutdown;
use crate::net::ConnectionTracker;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub layer: Arc<SessionLayer>,
    pub tracker: ConnectionTracker,
    pub shutdown: Shutdown,
    pub api_key: Arc<str>,
}

/// HTTP/WebSocket front end of the layer.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(layer: Arc<SessionLayer>, config: &LayerConfig, shutdown: Shutdown) -> Self {
        let state = AppState {
            layer,
            tracker: ConnectionTracker::new(config.server.max_connections),
            shutdown,
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        let router = Self::build_router(config, state.clone());
        Self { router, state }
    }

    fn build_router(config: &LayerConfig, state: AppState) -> Router {
        let mut router = Router::new().route("/ws", get(ws_handler));
        if config.admin.enabled {
            router = router.merge(admin::setup_admin_router(state.clone()));
        }
        router.with_state(state).layer(TraceLayer::new_for_http())
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.state.tracker
    }

    /// Serve on `listener` until shutdown is triggered.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut shutdown = self.state.shutdown.subscribe();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        let tracker = self.state.tracker;
        if !tracker.wait_for_drain(DRAIN_TIMEOUT).await {
            tracing::warn!(remaining = tracker.active_count(), "Player sockets did not drain in time");
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

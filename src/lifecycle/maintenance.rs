//! Background maintenance loops.
//!
//! # Responsibilities
//! - Periodically reap expired sessions (and their snapshots)
//! - Periodically sweep expired fallback cache entries
//!
//! # Design Decisions
//! - Both loops exit on the shutdown broadcast
//! - The reap interval is re-read every round so a config reload applies
//!   without restarting the task

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::cache::FallbackCache;
use crate::layer::SessionLayer;

pub async fn run_reaper(layer: Arc<SessionLayer>, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!(
        interval_secs = layer.registry().config().reap_interval_secs,
        "Session reaper starting"
    );

    loop {
        let interval = layer.registry().config().reap_interval();
        tokio::select! {
            _ = time::sleep(interval) => {
                let expired = layer.reap().await;
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "Reaped expired sessions");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session reaper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

pub async fn run_cache_sweeper(
    cache: Arc<FallbackCache>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = cache.sweep();
                if removed > 0 {
                    tracing::debug!(removed, remaining = cache.len(), "Swept fallback cache");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

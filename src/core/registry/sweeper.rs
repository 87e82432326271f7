// src/core/registry/sweeper.rs

use super::ClientRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Periodically disconnects clients that have been idle for too long.
pub struct IdleSweeperTask {
    registry: Arc<ClientRegistry>,
    interval: Duration,
}

impl IdleSweeperTask {
    pub fn new(registry: Arc<ClientRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Runs until the registry broadcasts shutdown.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Idle client sweeper started. Check interval: {:?}", self.interval);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be idle yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = self.registry.sync_clients().await;
                    if evicted > 0 {
                        debug!("Idle client sweeper: evicted {evicted} clients.");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Idle client sweeper shutting down.");
                    return;
                }
            }
        }
    }
}

// src/core/tasks/topology_sync.rs

//! The periodic full-sync task with its adaptive interval.

use crate::core::state::EngineState;
use crate::core::topology::sync;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct TopologySyncTask {
    state: Arc<EngineState>,
}

impl TopologySyncTask {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    /// Sleeps the scheduler's current interval between passes: 5 minutes
    /// while errors are fresh, 30 by default, 60 after two quiet hours.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("topology sync task started");
        // One pass right away; the correspondence state should be fresh
        // before the first interval elapses.
        if let Err(e) = sync::run_full_sync(&self.state).await {
            warn!(error = %e, "initial topology sync failed");
        }
        loop {
            let interval = self.state.sync.current_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = sync::run_full_sync(&self.state).await {
                        warn!(error = %e, "topology sync pass failed");
                        self.state
                            .notifier
                            .error("Topology sync failed", &e.to_string(), None)
                            .await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("topology sync task shutting down");
                    return;
                }
            }
        }
    }
}

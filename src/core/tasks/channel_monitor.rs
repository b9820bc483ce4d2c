// src/core/tasks/channel_monitor.rs

//! The 10-minute channel monitor loop.

use crate::core::state::EngineState;
use crate::core::topology::monitor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

const MONITOR_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub struct ChannelMonitorTask {
    state: Arc<EngineState>,
}

impl ChannelMonitorTask {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("channel monitor task started");
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        // The first tick fires immediately; discovery should not wait ten
        // minutes after boot.
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = monitor::run_monitor_pass(&self.state).await {
                        warn!(error = %e, "channel monitor pass failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("channel monitor task shutting down");
                    // The session-scoped suppression tables die with the
                    // loop.
                    self.state.session.clear_session();
                    return;
                }
            }
        }
    }
}

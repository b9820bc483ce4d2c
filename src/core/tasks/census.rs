// src/core/tasks/census.rs

//! The periodic membership census.

use crate::core::members::detector::MemberDetector;
use crate::core::members::tracker;
use crate::core::state::EngineState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

const CENSUS_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

pub struct CensusTask {
    state: Arc<EngineState>,
    /// The detector persists across runs; its cache is the first method of
    /// the next run.
    detector: MemberDetector,
}

impl CensusTask {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self {
            state,
            detector: MemberDetector::new(),
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("membership census task started");
        let mut interval = tokio::time::interval(CENSUS_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match tracker::run_census(&self.state, &mut self.detector).await {
                        Ok(report) => info!(
                            detected = report.unique_detected,
                            written = report.written,
                            "census pass complete"
                        ),
                        Err(e) => warn!(error = %e, "census pass failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("membership census task shutting down");
                    return;
                }
            }
        }
    }
}

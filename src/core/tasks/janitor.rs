// src/core/tasks/janitor.rs

//! The data janitor: TTL sweeps over the ephemeral collections, rate
//! limiter housekeeping, retry-queue cleanup, and the periodic status
//! line.

use crate::core::state::EngineState;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Limiter buckets and session caches are swept every minute.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Store TTL sweep, retry cleanup and the status line run hourly.
const DEEP_CLEAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct JanitorTask {
    state: Arc<EngineState>,
}

impl JanitorTask {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("janitor task started");
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        let mut deep_clean = tokio::time::interval(DEEP_CLEAN_INTERVAL);
        loop {
            tokio::select! {
                _ = housekeeping.tick() => {
                    self.state.limiter.sweep();
                    self.state.session.sweep();
                }
                _ = deep_clean.tick() => {
                    self.deep_clean().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("janitor task shutting down");
                    return;
                }
            }
        }
    }

    async fn deep_clean(&self) {
        match self.state.store.expire_ephemeral(Utc::now()).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "expired ephemeral store rows"),
            Err(e) => warn!(error = %e, "store TTL sweep failed"),
        }

        let shed = self.state.retries.cleanup_stale();
        if shed > 0 {
            info!(shed, "cancelled stale retry tasks");
        }

        let processed_rows = self
            .state
            .store
            .count_processed()
            .await
            .unwrap_or_default();
        let stats = &self.state.stats;
        info!(
            events = stats.events_seen.load(Ordering::Relaxed),
            committed = stats.messages_committed.load(Ordering::Relaxed),
            failed = stats.messages_failed.load(Ordering::Relaxed),
            skipped = stats.messages_skipped.load(Ordering::Relaxed),
            edits = stats.edits_applied.load(Ordering::Relaxed),
            backfilled = stats.messages_backfilled.load(Ordering::Relaxed),
            processed_rows,
            retry_queue = self.state.retries.len(),
            recoveries = self.state.recovery.in_flight_count(),
            endpoints = self.state.endpoints.cached_count(),
            limiter_buckets = self.state.limiter.bucket_count(),
            "engine status"
        );
    }
}

// src/engine/event_loop.rs

//! The main event consumption loop and graceful shutdown.
//!
//! One consumer task runs per replication pair, draining its event source
//! into the pipeline. Shutdown refuses new events, lets in-flight
//! submissions finish within a bound, then joins everything.

use super::context::EngineContext;
use crate::core::events::EventSource;
use crate::core::transport::gateway::PollingEventSource;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Bound on the in-flight drain at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(mut ctx: EngineContext) {
    let mut consumers: JoinSet<()> = JoinSet::new();

    for pair in &ctx.pairs {
        let state = pair.state.clone();
        let pipeline = pair.pipeline.clone();
        let mut source = PollingEventSource::new(
            state.observation.clone(),
            state.store.clone(),
            state.limiter.clone(),
            state.pair.source_server_id.clone(),
            state.config.replication.scrape_delay,
            state.shutdown.clone(),
        );
        consumers.spawn(async move {
            info!(source = %state.pair.source_server_id, "event consumer started");
            while let Some(event) = source.recv().await {
                pipeline.on_source_event(event).await;
            }
            info!(source = %state.pair.source_server_id, "event consumer stopped");
        });
    }

    // Run until the operator interrupts or every consumer dies on its own.
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        }
        _ = async { while consumers.join_next().await.is_some() {} } => {
            info!("all event consumers ended");
        }
    }

    // Refuse new events, then drain.
    ctx.shutdown_token.cancel();
    let _ = ctx.shutdown_tx.send(());
    consumers.abort_all();
    while consumers.join_next().await.is_some() {}

    for pair in &ctx.pairs {
        pair.pipeline.drain(DRAIN_TIMEOUT).await;
        pair.state.retries.cancel_all();
        pair.state.recovery.cancel_all();
    }

    // Periodic tasks exit on the broadcast; give them a moment, then cut.
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            ctx.background_tasks.abort_all();
            break;
        }
        match tokio::time::timeout(remaining, ctx.background_tasks.join_next()).await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => {
                ctx.background_tasks.abort_all();
                break;
            }
        }
    }

    info!("engine stopped");
}

// src/engine/spawner.rs

//! Spawns all of the engine's long-running background tasks.

use super::context::EngineContext;
use crate::core::tasks::{
    activity_watch::ActivityWatchTask, census::CensusTask, channel_monitor::ChannelMonitorTask,
    janitor::JanitorTask, topology_sync::TopologySyncTask,
};
use tracing::info;

/// Spawns the per-pair background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut EngineContext) {
    for pair in &ctx.pairs {
        let sync_task = TopologySyncTask::new(pair.state.clone());
        let shutdown_rx_sync = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            sync_task.run(shutdown_rx_sync).await;
        });

        let monitor_task = ChannelMonitorTask::new(pair.state.clone());
        let shutdown_rx_monitor = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            monitor_task.run(shutdown_rx_monitor).await;
        });

        let activity_task = ActivityWatchTask::new(pair.state.clone());
        let shutdown_rx_activity = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            activity_task.run(shutdown_rx_activity).await;
        });

        let census_task = CensusTask::new(pair.state.clone());
        let shutdown_rx_census = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            census_task.run(shutdown_rx_census).await;
        });

        let janitor_task = JanitorTask::new(pair.state.clone());
        let shutdown_rx_janitor = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            janitor_task.run(shutdown_rx_janitor).await;
        });
    }
    info!("all background tasks have been spawned");
}

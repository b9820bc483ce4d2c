// src/engine/mod.rs

//! Engine startup: state initialization, background task spawning and the
//! event consumption loop.

use crate::config::Config;
use anyhow::Result;

mod context;
mod event_loop;
mod initialization;
mod spawner;

pub use context::{EngineContext, PairRuntime};

/// The main engine startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Connect the store, build one state per replication pair.
    let mut context = initialization::setup(config).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut context);

    // 3. Consume source events until shutdown. This runs until the
    //    process is told to stop.
    event_loop::run(context).await;

    Ok(())
}

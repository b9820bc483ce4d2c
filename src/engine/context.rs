// src/engine/context.rs

use crate::core::pipeline::Pipeline;
use crate::core::state::EngineState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Everything one replication pair runs on.
pub struct PairRuntime {
    pub state: Arc<EngineState>,
    pub pipeline: Arc<Pipeline>,
}

/// Holds all the initialized state required to run the engine's main loop.
pub struct EngineContext {
    pub pairs: Vec<PairRuntime>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub shutdown_token: CancellationToken,
    pub background_tasks: JoinSet<()>,
}

// src/engine/initialization.rs

//! Builds the engine's runtime state from a validated configuration.
//!
//! Fatal invariants live here: an unreachable store or empty pair list
//! aborts startup with a non-zero exit instead of limping along.

use super::context::{EngineContext, PairRuntime};
use crate::config::Config;
use crate::core::pipeline::Pipeline;
use crate::core::state::EngineState;
use crate::core::store::{MemoryStore, MongoStore, SharedStore};
use crate::core::topology::sync;
use crate::core::transport::http::{HttpControlClient, HttpObservationClient};
use crate::core::transport::webhook::HttpEndpointFactory;
use anyhow::{Context as AnyhowContext, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn setup(config: Config) -> Result<EngineContext> {
    let config = Arc::new(config);

    let store: SharedStore = if config.store.in_memory {
        warn!("running against the in-memory store; nothing survives a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            MongoStore::connect(&config.store.uri)
                .await
                .context("store unreachable at startup")?,
        )
    };

    let http = reqwest::Client::new();
    let control = Arc::new(HttpControlClient::new(
        http.clone(),
        config.provider.api_base.clone(),
        config.provider.bot_token.clone(),
    ));
    let observation = Arc::new(HttpObservationClient::new(
        http.clone(),
        config.provider.api_base.clone(),
        config.provider.user_token.clone(),
    ));
    let endpoint_factory = Arc::new(HttpEndpointFactory::new(
        http,
        config.provider.api_base.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let shutdown_token = CancellationToken::new();

    let mut pairs = Vec::with_capacity(config.pairs.len());
    for pair_config in &config.pairs {
        // Operator overrides persisted in the ServerConfig collection take
        // precedence over the file for the log channel targets.
        let mut pair_config = pair_config.clone();
        if let Ok(Some(stored)) = store.get_server_config(&pair_config.mirror_server_id).await {
            if stored.error_channel_id.is_some() {
                pair_config.error_channel_id = stored.error_channel_id;
            }
            if stored.newroom_channel_id.is_some() {
                pair_config.newroom_channel_id = stored.newroom_channel_id;
            }
            if stored.admin_channel_id.is_some() {
                pair_config.admin_channel_id = stored.admin_channel_id;
            }
            if stored.mention_channel_id.is_some() {
                pair_config.mention_channel_id = stored.mention_channel_id;
            }
        }

        let state = EngineState::new(
            config.clone(),
            pair_config.clone(),
            store.clone(),
            control.clone(),
            observation.clone(),
            endpoint_factory.clone(),
            shutdown_token.child_token(),
        );

        // System roles first, so the mirror is usable even before the
        // first sync pass.
        if let Err(e) = sync::ensure_system_roles(&state).await {
            warn!(
                mirror = %state.pair.mirror_server_id,
                error = %e,
                "could not ensure system roles"
            );
        }

        let pipeline = Pipeline::new(state.clone());
        info!(
            source = %state.pair.source_server_id,
            mirror = %state.pair.mirror_server_id,
            "replication pair initialized"
        );
        pairs.push(PairRuntime { state, pipeline });
    }

    Ok(EngineContext {
        pairs,
        shutdown_tx,
        shutdown_token,
        background_tasks: JoinSet::new(),
    })
}

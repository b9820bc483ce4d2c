// src/core/recovery/backfill.rs

//! Backfill: pulling the most recent source messages into a freshly
//! created or recovered mirror channel so users do not see a temporal gap.

use crate::core::errors::MirrorError;
use crate::core::pipeline;
use crate::core::state::{EngineState, EngineStats};
use std::sync::Arc;
use tracing::{debug, info};

/// How far back a backfill reaches.
pub const BACKFILL_WINDOW: u32 = 50;

/// Replays up to the last [`BACKFILL_WINDOW`] source messages into the
/// mirror channel, oldest first, deduping against already-processed ids.
/// Returns the number of messages committed.
pub async fn run_backfill(
    state: &Arc<EngineState>,
    source_channel_id: &str,
    mirror_channel_id: &str,
) -> Result<usize, MirrorError> {
    let mut messages = state
        .observation
        .fetch_channel_messages(source_channel_id, BACKFILL_WINDOW, None, None)
        .await?;
    // The provider returns newest first; replay in source order.
    messages.reverse();

    let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
    let already_processed = state.store.filter_processed(&ids).await?;

    let mut committed = 0usize;
    for message in messages {
        if already_processed.contains(&message.id) {
            continue;
        }
        match pipeline::replicate_resolved(state, message, mirror_channel_id).await {
            Ok(true) => {
                committed += 1;
                EngineStats::bump(&state.stats.messages_backfilled);
            }
            Ok(false) => {}
            Err(e) => {
                // One bad message must not abort the rest of the window.
                debug!(error = %e, "backfill message failed");
            }
        }
    }

    info!(
        channel = source_channel_id,
        mirror = mirror_channel_id,
        committed,
        "backfill complete"
    );
    Ok(committed)
}

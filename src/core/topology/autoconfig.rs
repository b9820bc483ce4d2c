// src/core/topology/autoconfig.rs

//! Reactive auto-configuration: a live message arrives from a source
//! channel the mirror does not know yet.
//!
//! Threads and forum posts are the usual case (the periodic loops skip
//! them on purpose). The parent decides the shape: a forum parent gets a
//! mirror forum plus a post thread, a text parent gets a thread under the
//! corresponding mirror channel. The last 50 source messages are
//! backfilled before the live stream is released.

use crate::core::errors::MirrorError;
use crate::core::events::SourceChannel;
use crate::core::model::{ChannelKind, ChannelMapping};
use crate::core::recovery::backfill;
use crate::core::state::EngineState;
use crate::core::transport::ForumPostRequest;
use std::sync::Arc;
use tracing::{debug, info};

/// Threads opened by auto-configuration archive after a day.
const THREAD_AUTO_ARCHIVE_MINUTES: u32 = 1440;

/// Configures the mirror side for an unknown source channel and returns
/// the mirror channel id, or `None` when the source object cannot be
/// configured (not visible, unsupported parent).
pub async fn auto_configure_channel(
    state: &Arc<EngineState>,
    source_channel_id: &str,
) -> Result<Option<String>, MirrorError> {
    let Some(source) = state
        .observation
        .fetch_thread_by_id(source_channel_id)
        .await?
    else {
        debug!(channel = source_channel_id, "unknown channel is not visible; skipping");
        return Ok(None);
    };

    let mirror_id = if source.kind.is_thread() {
        match configure_thread(state, &source).await? {
            Some(id) => id,
            None => return Ok(None),
        }
    } else {
        state.correspondence.auto_create_channel(&source).await?.id
    };

    // Close the visibility gap before live replication starts.
    backfill::run_backfill(state, source_channel_id, &mirror_id).await?;
    Ok(Some(mirror_id))
}

/// Creates the mirror counterpart of a source thread, shaping it after the
/// parent's kind.
async fn configure_thread(
    state: &Arc<EngineState>,
    source: &SourceChannel,
) -> Result<Option<String>, MirrorError> {
    let Some(parent_source_id) = &source.parent_id else {
        return Ok(None);
    };
    let Some(parent) = state
        .observation
        .fetch_thread_by_id(parent_source_id)
        .await?
    else {
        return Ok(None);
    };

    let _guard = state.topology_lock.lock().await;

    let created = match parent.kind {
        ChannelKind::Forum => {
            let mirror_forum_id = ensure_mirror_parent(state, &parent).await?;
            state
                .control
                .create_forum_post(
                    &mirror_forum_id,
                    ForumPostRequest {
                        title: source.name.clone(),
                        initial_content: format!("Mirrored post `{}`.", source.name),
                        auto_archive_minutes: THREAD_AUTO_ARCHIVE_MINUTES,
                        available_tags: Vec::new(),
                    },
                )
                .await?
        }
        ChannelKind::Text | ChannelKind::News => {
            let mirror_parent_id = ensure_mirror_parent(state, &parent).await?;
            state
                .control
                .start_thread(&mirror_parent_id, &source.name)
                .await?
        }
        other => {
            debug!(parent_kind = %other, "thread parent kind is not configurable");
            return Ok(None);
        }
    };

    let mut mapping = ChannelMapping::new(
        &source.id,
        &state.pair.source_server_id,
        &source.name,
        source.kind,
    );
    mapping.mirror_channel_id = Some(created.id.clone());
    mapping.parent_source_id = Some(parent_source_id.clone());
    mapping.scraped = true;
    state.correspondence.register_channel_mapping(&mapping).await?;

    info!(
        thread = %source.id,
        mirror = %created.id,
        name = %source.name,
        "auto-configured mirror thread"
    );
    Ok(Some(created.id))
}

/// Resolves the mirror id of a thread's parent, creating the parent on the
/// mirror when it is missing. Callers hold the topology lock.
async fn ensure_mirror_parent(
    state: &Arc<EngineState>,
    parent: &SourceChannel,
) -> Result<String, MirrorError> {
    if let Some(mapping) = state
        .store
        .find_channel(&parent.id, &state.pair.source_server_id)
        .await?
    {
        if let Some(mirror_id) = mapping.live_mirror_id() {
            if state.control.channel_exists(mirror_id).await? {
                return Ok(mirror_id.to_string());
            }
        }
    }
    let created = state
        .correspondence
        .auto_create_channel_locked(parent)
        .await?;
    state.notifier.newroom(&parent.name, &created.id).await;
    Ok(created.id)
}

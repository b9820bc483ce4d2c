// src/core/topology/deferred.rs

//! Deferred channel creation out of mention placeholders.
//!
//! When mention rewriting leaves `**#name**` placeholders for unmapped
//! channel references, the message commits immediately and a background
//! job creates the missing mirror channels, then edits the committed
//! message in place so the placeholders become live references. One job
//! runs per committed message, so concurrent placeholder edits cannot
//! race each other's read-modify-write on the record.

use crate::core::errors::MirrorError;
use crate::core::pipeline::normalize::{PendingChannelRef, channel_placeholder};
use crate::core::retry::{RetryPriority, RetryTask};
use crate::core::state::EngineState;
use crate::core::transport::payload::{AllowedMentions, OutboundPayload};
use crate::core::transport::webhook::EndpointHandle;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFERRED_ATTEMPTS: u32 = 2;
const DEFERRED_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Queues creation of the pending channels referenced by a committed
/// message, followed by the in-place edit.
pub fn schedule_deferred_creations(
    state: Arc<EngineState>,
    source_message_id: String,
    pending: Vec<PendingChannelRef>,
) {
    if pending.is_empty() {
        return;
    }
    let task_id = format!("deferred-mention:{source_message_id}");
    let op_state = state.clone();
    let op_pending = pending.clone();
    let op_message_id = source_message_id.clone();

    state.retries.schedule(RetryTask {
        id: task_id,
        priority: RetryPriority::Low,
        max_attempts: DEFERRED_ATTEMPTS,
        delays: vec![DEFERRED_RETRY_DELAY],
        op: Box::new(move |_attempt| {
            let state = op_state.clone();
            let pending = op_pending.clone();
            let message_id = op_message_id.clone();
            Box::pin(async move { resolve_placeholders(&state, &message_id, &pending).await })
        }),
        on_success: None,
        on_failure: Some(Box::new(move |e| {
            warn!(message = %source_message_id, error = %e, "deferred channel creation failed");
        })),
    });
}

/// Creates each missing channel and swaps its placeholder for a live
/// reference in the committed mirror message.
async fn resolve_placeholders(
    state: &Arc<EngineState>,
    source_message_id: &str,
    pending: &[PendingChannelRef],
) -> Result<(), MirrorError> {
    let Some(mut record) = state.store.find_processed(source_message_id).await? else {
        // The record expired or was purged; nothing left to edit.
        return Ok(());
    };

    let mut rendered = record.rendered_content.clone();
    let mut changed = false;

    for reference in pending {
        let mirror_id = match ensure_channel(state, reference).await {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(e) => {
                debug!(channel = %reference.source_channel_id, error = %e, "deferred creation attempt failed");
                return Err(e);
            }
        };
        let placeholder = channel_placeholder(&reference.name);
        if rendered.contains(&placeholder) {
            rendered = rendered.replace(&placeholder, &format!("<#{mirror_id}>"));
            changed = true;
        }
    }

    if !changed {
        return Ok(());
    }

    let endpoint = state.endpoints.rehydrate(EndpointHandle {
        id: record.impersonation_endpoint_id.clone(),
        secret: record.impersonation_endpoint_secret.clone(),
    });
    let payload = OutboundPayload {
        content: rendered.clone(),
        allowed_mentions: AllowedMentions::none(),
        ..Default::default()
    };
    endpoint
        .edit_message(&record.mirror_message_id, &payload)
        .await?;

    record.rendered_content = rendered;
    state.store.update_processed(&record).await?;
    Ok(())
}

/// Resolves a pending reference to a mirror channel id, creating the
/// channel when the source side is visible.
async fn ensure_channel(
    state: &Arc<EngineState>,
    reference: &PendingChannelRef,
) -> Result<Option<String>, MirrorError> {
    if let Some(existing) = state
        .correspondence
        .resolve_channel(&reference.source_channel_id)
        .await?
    {
        return Ok(Some(existing));
    }
    let Some(source) = state
        .observation
        .fetch_thread_by_id(&reference.source_channel_id)
        .await?
    else {
        return Ok(None);
    };
    if !source.kind.is_replication_target() {
        return Ok(None);
    }
    let created = state.correspondence.auto_create_channel(&source).await?;
    state.notifier.newroom(&source.name, &created.id).await;
    Ok(Some(created.id))
}

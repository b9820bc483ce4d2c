// src/core/recovery/mod.rs

//! The auto-recovery state machine.
//!
//! Triggered when a source channel that *has* a correspondence row can no
//! longer be resolved to a live mirror channel. Per key the state runs
//! `idle → attempt1 → attempt2 → attempt3 → success | failed`, with at
//! most one recovery in flight per key. Attempt 1 forces a topology sync
//! and re-resolves; attempt 2 creates the mirror channel by hand (a
//! permission failure blacklists instead); attempt 3 forces another sync
//! after a settle delay. A success backfills the gap and posts a
//! recovered notice; a failure mutes the key for the session.

pub mod backfill;

use crate::core::errors::MirrorError;
use crate::core::model::SourceMessage;
use crate::core::pipeline;
use crate::core::state::EngineState;
use crate::core::topology::{monitor, sync};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Back-offs before each attempt.
const ATTEMPT_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(10),
];

/// Settle delay inside attempt 3 before the second forced sync.
const ATTEMPT3_SETTLE: Duration = Duration::from_secs(2);

pub fn recovery_key(source_channel_id: &str, mirror_server_id: &str) -> String {
    format!("{source_channel_id}:{mirror_server_id}")
}

/// Starts a recovery for a source channel unless one is already running,
/// recently succeeded, or permanently failed this session. The triggering
/// message, when given, is committed as soon as the channel is back.
pub fn trigger_recovery(
    state: Arc<EngineState>,
    source_channel_id: String,
    pending_message: Option<SourceMessage>,
) {
    let key = recovery_key(&source_channel_id, &state.pair.mirror_server_id);

    if state.session.failed_channels.contains(&key) {
        debug!(key = %key, "recovery already failed this session; not retrying");
        return;
    }
    if state.session.recently_recovered.contains(&key) {
        debug!(key = %key, "recently recovered; skipping duplicate trigger");
        return;
    }
    let Some(token) = state.recovery.claim(&key) else {
        return;
    };

    tokio::spawn(async move {
        let outcome = run_recovery(&state, &source_channel_id, &key, &token).await;
        state.recovery.release(&key);
        match outcome {
            Ok(Some(mirror_channel_id)) => {
                state.session.recently_recovered.insert(key.clone(), ());
                info!(channel = %source_channel_id, mirror = %mirror_channel_id, "recovery succeeded");
                state
                    .notifier
                    .error(
                        "Channel recovered",
                        &format!(
                            "`{source_channel_id}` is mirrored again as <#{mirror_channel_id}>; \
                             backfilling the gap."
                        ),
                        None,
                    )
                    .await;
                state
                    .notifier
                    .admin(&format!("auto-recovery restored `{source_channel_id}`"))
                    .await;

                if let Some(message) = pending_message {
                    if let Err(e) =
                        pipeline::replicate_resolved(&state, message, &mirror_channel_id).await
                    {
                        warn!(error = %e, "failed to commit the message that triggered recovery");
                    }
                }
                if let Err(e) =
                    backfill::run_backfill(&state, &source_channel_id, &mirror_channel_id).await
                {
                    warn!(error = %e, channel = %source_channel_id, "backfill failed");
                }
            }
            Ok(None) => {
                // Cancelled mid-flight; neither success nor failure.
            }
            Err(e) => {
                state.session.failed_channels.insert(key.clone(), ());
                warn!(channel = %source_channel_id, error = %e, "recovery failed");
                state
                    .notifier
                    .error(
                        "Channel recovery failed",
                        &format!(
                            "Could not restore a mirror for `{source_channel_id}`: {e}\n\
                             No further automatic retries this session."
                        ),
                        Some("Trigger a manual sync once the cause is fixed."),
                    )
                    .await;
            }
        }
    });
}

/// The attempt ladder. Returns the recovered mirror channel id, `None` on
/// cancellation.
async fn run_recovery(
    state: &Arc<EngineState>,
    source_channel_id: &str,
    key: &str,
    token: &CancellationToken,
) -> Result<Option<String>, MirrorError> {
    for (attempt, backoff) in ATTEMPT_BACKOFFS.iter().enumerate() {
        tokio::select! {
            _ = tokio::time::sleep(*backoff) => {}
            _ = token.cancelled() => return Ok(None),
        }

        let result = match attempt {
            0 => attempt_forced_sync(state, source_channel_id).await,
            1 => attempt_manual_creation(state, source_channel_id).await,
            _ => {
                tokio::select! {
                    _ = tokio::time::sleep(ATTEMPT3_SETTLE) => {}
                    _ = token.cancelled() => return Ok(None),
                }
                attempt_forced_sync(state, source_channel_id).await
            }
        };

        match result {
            Ok(Some(mirror_id)) => return Ok(Some(mirror_id)),
            Ok(None) => {
                debug!(key = %key, attempt = attempt + 1, "recovery attempt found nothing");
            }
            // A blacklist decision ends the ladder immediately.
            Err(e) if e.is_access_failure() => return Err(e),
            Err(e) => {
                debug!(key = %key, attempt = attempt + 1, error = %e, "recovery attempt errored");
            }
        }
    }
    Err(MirrorError::RecoveryFailed(source_channel_id.to_string()))
}

/// Attempts 1 and 3: force a full sync, then re-resolve. The resolver
/// verifies the returned id points at an existing channel.
async fn attempt_forced_sync(
    state: &Arc<EngineState>,
    source_channel_id: &str,
) -> Result<Option<String>, MirrorError> {
    sync::run_full_sync(state).await?;
    state.correspondence.resolve_channel(source_channel_id).await
}

/// Attempt 2: create the mirror channel by hand. A source-side permission
/// failure blacklists the channel and aborts the ladder.
async fn attempt_manual_creation(
    state: &Arc<EngineState>,
    source_channel_id: &str,
) -> Result<Option<String>, MirrorError> {
    match state
        .observation
        .test_channel_access(source_channel_id)
        .await?
    {
        crate::core::transport::ChannelAccess::Accessible => {}
        crate::core::transport::ChannelAccess::Denied
        | crate::core::transport::ChannelAccess::Missing => {
            let existing = state
                .store
                .find_channel(source_channel_id, &state.pair.source_server_id)
                .await?;
            let source = crate::core::events::SourceChannel {
                id: source_channel_id.to_string(),
                server_id: state.pair.source_server_id.clone(),
                name: existing
                    .as_ref()
                    .map(|m| m.name.clone())
                    .unwrap_or_else(|| source_channel_id.to_string()),
                kind: existing
                    .as_ref()
                    .map(|m| m.kind)
                    .unwrap_or(crate::core::model::ChannelKind::Text),
                parent_id: None,
            };
            monitor::blacklist_channel(state, &source, existing).await?;
            return Err(MirrorError::AccessDenied(format!(
                "source channel {source_channel_id} is not accessible"
            )));
        }
    }

    let Some(source) = state
        .observation
        .fetch_thread_by_id(source_channel_id)
        .await?
    else {
        return Err(MirrorError::NotFound(format!(
            "source channel {source_channel_id} vanished"
        )));
    };
    let created = state.correspondence.auto_create_channel(&source).await?;
    Ok(Some(created.id))
}

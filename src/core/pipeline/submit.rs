// src/core/pipeline/submit.rs

//! Outbound submission: the retry ladder in front of the impersonation
//! endpoints, thread target resolution, and the processed-message commit.

use crate::core::errors::MirrorError;
use crate::core::model::channel::ProcessedMessage;
use crate::core::state::EngineState;
use crate::core::transport::payload::OutboundPayload;
use crate::core::transport::webhook::{ImpersonationEndpoint, SentMessage};
use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts and their backoffs; a doubled delay applies to network-class
/// failures. Rate limits wait out the server-supplied delay and do not
/// consume attempts.
const SEND_ATTEMPTS: usize = 3;
const SEND_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Where a payload is actually posted: threads submit through their
/// parent's endpoint with a thread id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub endpoint_channel_id: String,
    pub thread_id: Option<String>,
}

/// Resolves the endpoint target for a source channel whose mirror id is
/// already known.
pub async fn target_for(
    state: &Arc<EngineState>,
    source_channel_id: &str,
    mirror_channel_id: &str,
) -> Result<Target, MirrorError> {
    if let Some(mapping) = state
        .store
        .find_channel(source_channel_id, &state.pair.source_server_id)
        .await?
    {
        if mapping.kind.is_thread() {
            if let Some(parent_source_id) = &mapping.parent_source_id {
                if let Some(parent) = state
                    .store
                    .find_channel(parent_source_id, &state.pair.source_server_id)
                    .await?
                {
                    if let Some(parent_mirror) = parent.live_mirror_id() {
                        return Ok(Target {
                            endpoint_channel_id: parent_mirror.to_string(),
                            thread_id: Some(mirror_channel_id.to_string()),
                        });
                    }
                }
            }
        }
    }
    Ok(Target {
        endpoint_channel_id: mirror_channel_id.to_string(),
        thread_id: None,
    })
}

/// Strips whatever made the provider reject the payload shape: invalid
/// embeds go away and an empty body gets fallback text.
fn sanitize_payload(payload: &mut OutboundPayload) {
    payload.embeds.retain(|e| e.is_valid());
    payload.ensure_nonempty_fallback("*[unrenderable message]*");
}

/// Runs one endpoint operation through the retry ladder.
async fn run_ladder<T>(
    state: &Arc<EngineState>,
    source_channel_id: &str,
    payload: &OutboundPayload,
    mut op: impl FnMut(OutboundPayload) -> BoxFuture<'static, Result<T, MirrorError>>,
) -> Result<T, MirrorError> {
    if payload.is_empty() {
        return Err(MirrorError::EmptyPayload);
    }
    let mut payload = payload.clone();
    let mut sanitized_once = false;
    let mut attempt = 0usize;

    loop {
        state.limiter.wait_for_request(source_channel_id).await;
        state.limiter.record_request(source_channel_id);

        match op(payload.clone()).await {
            Ok(value) => return Ok(value),
            // 429: honor the server's delay; not counted against attempts.
            Err(MirrorError::RateLimited(delay)) => {
                debug!(channel = source_channel_id, ?delay, "rate limited; honoring retry_after");
                tokio::time::sleep(delay).await;
            }
            // Bad shape: sanitize and reattempt exactly once.
            Err(MirrorError::InvalidPayload(detail)) if !sanitized_once => {
                warn!(channel = source_channel_id, detail = %detail, "payload rejected; sanitizing");
                sanitized_once = true;
                sanitize_payload(&mut payload);
            }
            Err(e) if e.is_transient() && attempt + 1 < SEND_ATTEMPTS => {
                let mut delay = SEND_BACKOFFS[attempt.min(SEND_BACKOFFS.len() - 1)];
                // Network-class failures back off twice as hard.
                if matches!(e, MirrorError::Io(_) | MirrorError::HttpClientError(_)) {
                    delay *= 2;
                }
                debug!(channel = source_channel_id, attempt, error = %e, "submission failed; retrying");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sends a payload through an endpoint with the full retry discipline.
pub async fn send_with_retries(
    state: &Arc<EngineState>,
    source_channel_id: &str,
    endpoint: Arc<dyn ImpersonationEndpoint>,
    payload: &OutboundPayload,
) -> Result<SentMessage, MirrorError> {
    run_ladder(state, source_channel_id, payload, move |p| {
        let endpoint = endpoint.clone();
        Box::pin(async move { endpoint.send(&p).await })
    })
    .await
}

/// Edits a committed mirror message with the same retry discipline.
pub async fn edit_with_retries(
    state: &Arc<EngineState>,
    source_channel_id: &str,
    endpoint: Arc<dyn ImpersonationEndpoint>,
    message_id: &str,
    payload: &OutboundPayload,
) -> Result<(), MirrorError> {
    let message_id = message_id.to_string();
    run_ladder(state, source_channel_id, payload, move |p| {
        let endpoint = endpoint.clone();
        let message_id = message_id.clone();
        Box::pin(async move { endpoint.edit_message(&message_id, &p).await })
    })
    .await
}

/// Persists the processed-message record that marks a source message as
/// committed. Returns `false` when another task committed first.
pub async fn commit_record(
    state: &Arc<EngineState>,
    source_message_id: &str,
    source_channel_id: &str,
    target: &Target,
    sent: &SentMessage,
    endpoint: &Arc<dyn ImpersonationEndpoint>,
    rendered_content: &str,
    awaiting_embed: bool,
) -> Result<bool, MirrorError> {
    let handle = endpoint.handle();
    let record = ProcessedMessage {
        source_message_id: source_message_id.to_string(),
        source_channel_id: source_channel_id.to_string(),
        mirror_message_id: sent.id.clone(),
        mirror_channel_id: target
            .thread_id
            .clone()
            .unwrap_or_else(|| target.endpoint_channel_id.clone()),
        mirror_server_id: state.pair.mirror_server_id.clone(),
        impersonation_endpoint_id: handle.id.clone(),
        impersonation_endpoint_secret: handle.secret.clone(),
        awaiting_embed,
        rendered_content: rendered_content.to_string(),
        processed_at: Utc::now(),
    };
    state.store.insert_processed(&record).await
}

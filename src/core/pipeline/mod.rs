// src/core/pipeline/mod.rs

//! The replication pipeline.
//!
//! A single entry point, `Pipeline::on_source_event`, fans events onto one
//! bounded worker per source channel. Within a channel, events process in
//! receive order and the next message does not start until the previous
//! submission committed or gave up; across channels workers are free to
//! reorder. Backpressure from a slow mirror propagates through the bounded
//! queues back to the gateway consumer.

pub mod attachments;
pub mod classify;
pub mod normalize;
pub mod submit;

use crate::core::errors::MirrorError;
use crate::core::events::{SourceEvent, SourceMessageUpdate};
use crate::core::model::message::{Embed, Reaction, SourceMessage};
use crate::core::model::ChannelMapping;
use crate::core::notify::COLOR_GREEN;
use crate::core::recovery;
use crate::core::state::{EngineState, EngineStats};
use crate::core::topology::{autoconfig, deferred, monitor, sync};
use crate::core::transport::payload::{self, AllowedMentions, OutboundPayload};
use crate::core::transport::webhook::EndpointHandle;
use crate::core::transport::ChannelAccess;
use chrono::Utc;
use classify::MessageClass;
use dashmap::DashMap;
use normalize::{ChannelRef, MappingSnapshot, MessageLink, Rendered, RoleRef};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Queue depth of one per-channel worker; a full queue suspends the event
/// consumer.
const WORKER_QUEUE_CAPACITY: usize = 64;

/// How long a plain user message waits for its late embed before flushing.
pub const MESSAGE_BUFFER_WINDOW: Duration = Duration::from_secs(3);

/// Author names the engine never replicates.
const BUILTIN_NOISE_AUTHORS: &[&str] = &["MEE6", "Dyno", "DISBOARD", "Statbot", "carl-bot"];

pub struct Pipeline {
    state: Arc<EngineState>,
    workers: DashMap<String, mpsc::Sender<SourceEvent>>,
    worker_tasks: SyncMutex<JoinSet<()>>,
}

impl Pipeline {
    pub fn new(state: Arc<EngineState>) -> Arc<Self> {
        Arc::new(Self {
            state,
            workers: DashMap::new(),
            worker_tasks: SyncMutex::new(JoinSet::new()),
        })
    }

    /// The single entry point for everything the source emits.
    pub async fn on_source_event(&self, event: SourceEvent) {
        EngineStats::bump(&self.state.stats.events_seen);
        if self.state.shutdown.is_cancelled() {
            return;
        }

        match event {
            // Topology events are not ordering-sensitive per channel; they
            // run off the worker path.
            SourceEvent::ChannelCreated(channel) => {
                let state = self.state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_channel_created(&state, channel).await {
                        warn!(error = %e, "failed to handle channel creation");
                    }
                });
            }
            SourceEvent::ThreadCreated(thread) => {
                let state = self.state.clone();
                tokio::spawn(async move {
                    if let Err(e) = autoconfig::auto_configure_channel(&state, &thread.id).await {
                        warn!(error = %e, thread = %thread.id, "failed to auto-configure thread");
                    }
                });
            }
            SourceEvent::RoleCreated(role) => {
                let state = self.state.clone();
                tokio::spawn(async move {
                    if let Err(e) = sync::mirror_new_role(&state, &role).await {
                        warn!(error = %e, role = %role.id, "failed to mirror new role");
                    }
                });
            }
            other => {
                let channel_id = other.channel_id().to_string();
                let sender = self.worker_sender(&channel_id);
                if sender.send(other).await.is_err() {
                    debug!(channel = %channel_id, "worker gone; dropping event");
                    self.workers.remove(&channel_id);
                }
            }
        }
    }

    /// Returns the ordered worker for a source channel, spawning it on
    /// first use.
    fn worker_sender(&self, channel_id: &str) -> mpsc::Sender<SourceEvent> {
        if let Some(existing) = self.workers.get(channel_id) {
            return existing.clone();
        }
        let entry = self.workers.entry(channel_id.to_string());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(o) => o.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
                let state = self.state.clone();
                let channel = channel_id.to_string();
                self.worker_tasks.lock().spawn(async move {
                    worker_loop(state, channel, rx).await;
                });
                v.insert(tx.clone());
                tx
            }
        }
    }

    /// Graceful drain: stop accepting, let in-flight submissions finish
    /// within the bound, then abort stragglers.
    pub async fn drain(&self, timeout: Duration) {
        self.workers.clear();
        let mut tasks = {
            let mut guard = self.worker_tasks.lock();
            std::mem::take(&mut *guard)
        };
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        tasks.abort_all();
        info!("pipeline drained");
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// One ordered worker per source channel.
async fn worker_loop(
    state: Arc<EngineState>,
    channel_id: String,
    mut rx: mpsc::Receiver<SourceEvent>,
) {
    let mut carry: Option<SourceEvent> = None;
    loop {
        let event = match carry.take() {
            Some(event) => event,
            None => match rx.recv().await {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            SourceEvent::MessageCreated(mut message) => {
                // Buffer gate: a plain user message may grow an embed
                // within the window; a matching update merges and flushes.
                if message.is_plain() && !message.author.is_bot {
                    carry = buffer_for_update(&mut message, &mut rx).await;
                }
                if let Err(e) = process_created(&state, message).await {
                    EngineStats::bump(&state.stats.messages_failed);
                    warn!(channel = %channel_id, error = %e, "message replication failed");
                }
            }
            SourceEvent::MessageUpdated(update) => {
                if let Err(e) = process_update(&state, update).await {
                    warn!(channel = %channel_id, error = %e, "message edit failed");
                }
            }
            SourceEvent::MessageDeleted { message_id, .. } => {
                // Last-state replication only; deletions are observed, not
                // mirrored.
                debug!(channel = %channel_id, message = %message_id, "source message deleted");
            }
            SourceEvent::ReactionAdded {
                message_id,
                reaction,
                ..
            } => {
                if let Err(e) = process_reaction(&state, &message_id, &reaction).await {
                    debug!(channel = %channel_id, error = %e, "reaction replication failed");
                }
            }
            // Topology events never reach workers.
            SourceEvent::ChannelCreated(_)
            | SourceEvent::ThreadCreated(_)
            | SourceEvent::RoleCreated(_) => {}
        }
    }
}

/// Holds a plain message for up to the buffer window. Returns an event to
/// carry into the next loop iteration when a non-matching event arrived
/// while waiting.
async fn buffer_for_update(
    message: &mut SourceMessage,
    rx: &mut mpsc::Receiver<SourceEvent>,
) -> Option<SourceEvent> {
    let deadline = tokio::time::Instant::now() + MESSAGE_BUFFER_WINDOW;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(SourceEvent::MessageUpdated(update))) if update.id == message.id => {
                if let Some(content) = update.content {
                    message.content = content;
                }
                message.embeds = update.embeds;
                return None;
            }
            // Anything else flushes the buffer first to preserve order.
            Ok(Some(other)) => return Some(other),
            Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

/// Built-in plus configured noise filter.
fn is_noise_author(state: &EngineState, author: &crate::core::model::SourceAuthor) -> bool {
    if BUILTIN_NOISE_AUTHORS
        .iter()
        .any(|n| n.eq_ignore_ascii_case(&author.username))
    {
        return true;
    }
    state.config.replication.noise_authors.iter().any(|pattern| {
        pattern == &author.id || wildmatch::WildMatch::new(pattern).matches(&author.username)
    })
}

/// Steps 1–3 of the per-message algorithm: filter, classify, locate,
/// then hand off to the submission path.
async fn process_created(state: &Arc<EngineState>, message: SourceMessage) -> Result<(), MirrorError> {
    if is_noise_author(state, &message.author) {
        EngineStats::bump(&state.stats.messages_skipped);
        return Ok(());
    }

    let mapping = state
        .store
        .find_channel(&message.channel_id, &state.pair.source_server_id)
        .await?;
    if let Some(mapping) = &mapping {
        if mapping.kind.is_voice_like() {
            EngineStats::bump(&state.stats.messages_skipped);
            return Ok(());
        }
        if mapping.is_blacklisted_at(Utc::now()) {
            EngineStats::bump(&state.stats.messages_skipped);
            return Ok(());
        }
    }

    // Exactly-once: the processed record is the commitment marker.
    if state.store.find_processed(&message.id).await?.is_some() {
        return Ok(());
    }

    let class = classify::classify(&message, &state.session.pending_commands);

    let mirror_channel_id = match state
        .correspondence
        .resolve_channel(&message.channel_id)
        .await?
    {
        Some(id) => id,
        None => {
            if mapping.is_some() {
                // A correspondence exists but its mirror side is gone:
                // that is recovery's job, and the message rides along.
                recovery::trigger_recovery(
                    state.clone(),
                    message.channel_id.clone(),
                    Some(message),
                );
                EngineStats::bump(&state.stats.messages_skipped);
                return Ok(());
            }
            match autoconfig::auto_configure_channel(state, &message.channel_id).await? {
                Some(id) => {
                    // The backfill that ran during configuration may have
                    // committed this message already.
                    if state.store.find_processed(&message.id).await?.is_some() {
                        return Ok(());
                    }
                    id
                }
                None => {
                    EngineStats::bump(&state.stats.messages_skipped);
                    return Ok(());
                }
            }
        }
    };

    // Auto-configuration may have registered a mapping that did not exist
    // when this message arrived.
    let mapping = match mapping {
        Some(mapping) => Some(mapping),
        None => {
            state
                .store
                .find_channel(&message.channel_id, &state.pair.source_server_id)
                .await?
        }
    };

    let prefix = match class {
        MessageClass::AppResponse {
            invoked_by: Some(invocation),
        } => Some(classify::response_prefix(&invocation)),
        _ => None,
    };
    replicate_core(state, message, &mirror_channel_id, prefix, mapping).await?;
    Ok(())
}

/// Entry point for backfill and recovery, where the mirror channel is
/// already resolved. Returns whether a new mirror message was committed.
pub async fn replicate_resolved(
    state: &Arc<EngineState>,
    message: SourceMessage,
    mirror_channel_id: &str,
) -> Result<bool, MirrorError> {
    if is_noise_author(state, &message.author) {
        return Ok(false);
    }
    if state.store.find_processed(&message.id).await?.is_some() {
        return Ok(false);
    }
    let mapping = state
        .store
        .find_channel(&message.channel_id, &state.pair.source_server_id)
        .await?;
    replicate_core(state, message, mirror_channel_id, None, mapping).await
}

/// Steps 4–11: normalize, fetch, split, submit, commit, post-actions.
async fn replicate_core(
    state: &Arc<EngineState>,
    message: SourceMessage,
    mirror_channel_id: &str,
    prefix: Option<String>,
    mapping: Option<ChannelMapping>,
) -> Result<bool, MirrorError> {
    let snapshot = build_snapshot(state, &message).await?;
    let rendered = normalize::rewrite(&message.content, &snapshot);

    let mut content = match prefix {
        Some(prefix) => format!("{prefix}{}", rendered.text),
        None => rendered.text.clone(),
    };

    let embeds: Vec<Embed> = message
        .embeds
        .iter()
        .filter(|e| e.is_valid())
        .take(crate::core::model::message::MAX_EMBEDS_PER_MESSAGE)
        .map(|e| normalize::rewrite_embed(e, &snapshot))
        .collect();

    let fetched = attachments::fetch_attachments(&state.http, &message.attachments).await;
    if let Some(block) = fetched.fallback_block() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&block);
    }
    let content = payload::clamp_content(&content);

    // Replicated user content may only ever ping roles; bot-authored role
    // pings are dropped too unless explicitly allowed.
    let allowed_mentions = if message.author.is_bot && !state.config.replication.allow_bot_mentions
    {
        AllowedMentions::none()
    } else {
        AllowedMentions::roles_only(rendered.live_role_ids.clone())
    };

    let target = submit::target_for(state, &message.channel_id, mirror_channel_id).await?;
    let endpoint = state
        .endpoints
        .for_channel(
            &target.endpoint_channel_id,
            state.endpoint_name(),
            state.control.as_ref(),
            &state.topology_lock,
        )
        .await?;

    let mut payload = OutboundPayload {
        content: content.clone(),
        embeds,
        files: fetched.files,
        username: message.author.username.clone(),
        avatar_url: message.author.avatar_url.clone(),
        allowed_mentions,
        thread_id: target.thread_id.clone(),
    };
    payload.ensure_nonempty_fallback("*[unrenderable message]*");

    let (mut first, file_groups) = match payload::plan_submission(payload) {
        payload::SubmissionPlan::Single(p) => (p, Vec::new()),
        payload::SubmissionPlan::Split { first, file_groups } => (first, file_groups),
    };
    // A split can leave a files-only message with an empty lead
    // submission; the fallback law forbids sending that.
    first.ensure_nonempty_fallback("*[files attached]*");

    let sent = submit::send_with_retries(state, &message.channel_id, endpoint.clone(), &first).await?;

    let awaiting_embed = message.has_link() && message.embeds.is_empty();
    submit::commit_record(
        state,
        &message.id,
        &message.channel_id,
        &target,
        &sent,
        &endpoint,
        &content,
        awaiting_embed,
    )
    .await?;
    EngineStats::bump(&state.stats.messages_committed);

    for group in file_groups {
        let follow_up = OutboundPayload {
            content: String::new(),
            embeds: Vec::new(),
            files: group,
            username: message.author.username.clone(),
            avatar_url: message.author.avatar_url.clone(),
            allowed_mentions: AllowedMentions::none(),
            thread_id: target.thread_id.clone(),
        };
        if let Err(e) =
            submit::send_with_retries(state, &message.channel_id, endpoint.clone(), &follow_up).await
        {
            warn!(error = %e, "file follow-up submission failed");
        }
    }

    if !rendered.pending_channels.is_empty() {
        deferred::schedule_deferred_creations(
            state.clone(),
            message.id.clone(),
            rendered.pending_channels.clone(),
        );
    }

    post_actions(state, &message, &target, &sent.id, &rendered, mapping).await;
    Ok(true)
}

/// Step 11: reactions, mention notifications, thread opening, liveness,
/// opportunistic member tracking.
async fn post_actions(
    state: &Arc<EngineState>,
    message: &SourceMessage,
    target: &submit::Target,
    mirror_message_id: &str,
    rendered: &Rendered,
    mapping: Option<ChannelMapping>,
) {
    let channel_name = mapping
        .as_ref()
        .map(|m| m.name.clone())
        .unwrap_or_else(|| message.channel_id.clone());

    // Mention notifications, unless the channel opted out.
    if !rendered.mentioned_roles.is_empty() || !rendered.mentioned_users.is_empty() {
        let suppressed = state
            .store
            .is_mention_blacklisted(&state.pair.source_server_id, &channel_name)
            .await
            .unwrap_or(false);
        let bot_suppressed =
            message.author.is_bot && !state.config.replication.allow_bot_mentions;
        if !suppressed && !bot_suppressed {
            let mut mentioned: Vec<String> = rendered
                .mentioned_roles
                .iter()
                .map(|r| format!("@{r}"))
                .collect();
            mentioned.extend(rendered.mentioned_users.iter().map(|u| format!("@{u}")));
            state
                .notifier
                .mention(&format!(
                    "{} mentioned in `#{}` by {}",
                    mentioned.join(", "),
                    channel_name,
                    message.author.username
                ))
                .await;
            for role_name in &rendered.mentioned_roles {
                let record = crate::core::model::RoleMentionRecord {
                    source_server_id: state.pair.source_server_id.clone(),
                    source_channel_id: message.channel_id.clone(),
                    channel_name: channel_name.clone(),
                    role_name: role_name.clone(),
                    source_message_id: message.id.clone(),
                    timestamp: Utc::now(),
                };
                if let Err(e) = state.store.append_role_mention(&record).await {
                    debug!(error = %e, "failed to record role mention");
                }
            }
        }
    }

    // The source opened a thread from this message; mirror that.
    if let Some(thread) = &message.started_thread {
        if target.thread_id.is_none() {
            match state
                .control
                .start_thread_from_message(&target.endpoint_channel_id, mirror_message_id, &thread.name)
                .await
            {
                Ok(created) => {
                    let mut mapping = ChannelMapping::new(
                        &thread.thread_id,
                        &state.pair.source_server_id,
                        &thread.name,
                        crate::core::model::ChannelKind::PublicThread,
                    );
                    mapping.mirror_channel_id = Some(created.id);
                    mapping.parent_source_id = Some(message.channel_id.clone());
                    mapping.scraped = true;
                    if let Err(e) = state.correspondence.register_channel_mapping(&mapping).await {
                        warn!(error = %e, "failed to register mirrored thread");
                    }
                }
                Err(e) => warn!(error = %e, "failed to open mirror thread"),
            }
        }
    }

    // Liveness: this commit resets the silence timer; a resumed mirror
    // gets its recovery notice.
    if let Some(downtime) = state.activity.record_activity(Utc::now()) {
        state
            .notifier
            .activity(
                "Mirror recovered",
                &format!(
                    "Replication resumed after {} of silence.",
                    crate::core::activity::format_downtime(downtime)
                ),
                COLOR_GREEN,
                None,
                false,
            )
            .await;
    }

    // Opportunistic membership census; never blocks the pipeline.
    if !message.author.is_bot {
        let state = state.clone();
        let author = message.author.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::core::members::tracker::observe_author(&state, &author).await {
                debug!(error = %e, "opportunistic member upsert failed");
            }
        });
    }

    // Update last-activity on the mapping so discovery can skip dead
    // channels.
    if let Some(mut mapping) = mapping {
        mapping.last_activity = Some(Utc::now());
        if let Err(e) = state.store.upsert_channel(&mapping).await {
            debug!(error = %e, "failed to stamp channel activity");
        }
    }
}

/// Handles a source-side edit: an awaited embed or a textual re-render,
/// through the stored endpoint credentials.
async fn process_update(
    state: &Arc<EngineState>,
    update: SourceMessageUpdate,
) -> Result<(), MirrorError> {
    let Some(mut record) = state.store.find_processed(&update.id).await? else {
        return Ok(());
    };

    let probe = SourceMessage {
        id: update.id.clone(),
        channel_id: update.channel_id.clone(),
        content: update.content.clone().unwrap_or_default(),
        embeds: update.embeds.clone(),
        ..Default::default()
    };
    let snapshot = build_snapshot(state, &probe).await?;

    let rendered_text = match &update.content {
        Some(raw) => payload::clamp_content(&normalize::rewrite(raw, &snapshot).text),
        None => record.rendered_content.clone(),
    };

    // An awaited embed is attached on arrival; otherwise edits re-render
    // textual content only and leave the mirror's embeds untouched.
    let embeds: Vec<Embed> = if record.awaiting_embed {
        update
            .embeds
            .iter()
            .filter(|e| e.is_valid())
            .take(crate::core::model::message::MAX_EMBEDS_PER_MESSAGE)
            .map(|e| normalize::rewrite_embed(e, &snapshot))
            .collect()
    } else {
        Vec::new()
    };

    // Second edit with identical payload is a no-op.
    if rendered_text == record.rendered_content && embeds.is_empty() {
        return Ok(());
    }

    let endpoint = state.endpoints.rehydrate(EndpointHandle {
        id: record.impersonation_endpoint_id.clone(),
        secret: record.impersonation_endpoint_secret.clone(),
    });
    let target = submit::target_for(state, &update.channel_id, &record.mirror_channel_id).await?;

    let payload = OutboundPayload {
        content: rendered_text.clone(),
        embeds,
        files: Vec::new(),
        username: String::new(),
        avatar_url: None,
        allowed_mentions: AllowedMentions::none(),
        thread_id: target.thread_id,
    };
    submit::edit_with_retries(
        state,
        &update.channel_id,
        endpoint,
        &record.mirror_message_id,
        &payload,
    )
    .await?;

    record.rendered_content = rendered_text;
    if !update.embeds.is_empty() {
        record.awaiting_embed = false;
    }
    state.store.update_processed(&record).await?;
    EngineStats::bump(&state.stats.edits_applied);
    Ok(())
}

/// Replicates a reaction when the emoji exists on the mirror.
async fn process_reaction(
    state: &Arc<EngineState>,
    message_id: &str,
    reaction: &Reaction,
) -> Result<(), MirrorError> {
    let Some(record) = state.store.find_processed(message_id).await? else {
        return Ok(());
    };
    let emoji = match &reaction.emoji_id {
        // Custom emoji must exist on the mirror under the same name.
        Some(_) => {
            let emojis = state
                .control
                .fetch_emojis(&state.pair.mirror_server_id)
                .await?;
            let Some(mirror_emoji) = emojis.iter().find(|e| e.name == reaction.emoji) else {
                return Ok(());
            };
            format!("{}:{}", mirror_emoji.name, mirror_emoji.id)
        }
        None => reaction.emoji.clone(),
    };
    state
        .control
        .add_reaction(&record.mirror_channel_id, &record.mirror_message_id, &emoji)
        .await
}

/// A live source channel appeared; mirror it right away instead of
/// waiting for the next monitor pass.
async fn handle_channel_created(
    state: &Arc<EngineState>,
    channel: crate::core::events::SourceChannel,
) -> Result<(), MirrorError> {
    if !channel.kind.is_replication_target() || channel.kind.is_thread() {
        return Ok(());
    }
    if state
        .store
        .find_channel(&channel.id, &state.pair.source_server_id)
        .await?
        .is_some()
    {
        return Ok(());
    }
    match state.observation.test_channel_access(&channel.id).await? {
        ChannelAccess::Accessible => {}
        ChannelAccess::Denied | ChannelAccess::Missing => {
            return Ok(());
        }
    }
    let cap_count = state
        .control
        .fetch_channels(&state.pair.mirror_server_id)
        .await?
        .iter()
        .filter(|c| c.kind.counts_toward_cap())
        .count();
    if !monitor::creation_allowed(state, cap_count).await {
        return Ok(());
    }
    let created = state.correspondence.auto_create_channel(&channel).await?;
    state.notifier.newroom(&channel.name, &created.id).await;
    Ok(())
}

/// Assembles the immutable mappings snapshot the pure rewriter runs
/// against: one store lookup per referenced id, with a source fetch as
/// the fallback for unknown channels.
async fn build_snapshot(
    state: &Arc<EngineState>,
    message: &SourceMessage,
) -> Result<MappingSnapshot, MirrorError> {
    let mut texts: Vec<&str> = vec![&message.content];
    for embed in &message.embeds {
        if let Some(t) = &embed.title {
            texts.push(t);
        }
        if let Some(d) = &embed.description {
            texts.push(d);
        }
        for field in &embed.fields {
            texts.push(&field.name);
            texts.push(&field.value);
        }
    }
    let scan = normalize::scan_refs(texts);

    let mut snapshot = MappingSnapshot {
        source_server_id: state.pair.source_server_id.clone(),
        mirror_server_id: state.pair.mirror_server_id.clone(),
        ..Default::default()
    };

    for channel_id in &scan.channel_ids {
        let entry = match state
            .store
            .find_channel(channel_id, &state.pair.source_server_id)
            .await?
        {
            Some(mapping) => ChannelRef {
                mirror_id: mapping.live_mirror_id().map(str::to_string),
                name: mapping.name,
            },
            None => match state.observation.fetch_thread_by_id(channel_id).await {
                Ok(Some(source)) => ChannelRef {
                    mirror_id: None,
                    name: source.name,
                },
                _ => continue,
            },
        };
        snapshot.channels.insert(channel_id.clone(), entry);
    }

    for role_id in &scan.role_ids {
        if let Some(mapping) = state
            .store
            .find_role(role_id, &state.pair.source_server_id)
            .await?
        {
            snapshot.roles.insert(
                role_id.clone(),
                RoleRef {
                    mirror_id: mapping.mirror_role_id,
                    name: mapping.name,
                },
            );
        }
    }

    for user_id in &scan.user_ids {
        if let Some(member) = state
            .store
            .find_member(&state.pair.source_server_id, user_id)
            .await?
        {
            snapshot.users.insert(user_id.clone(), member.username);
        }
    }

    for message_id in &scan.message_ids {
        if let Some(processed) = state.store.find_processed(message_id).await? {
            snapshot.message_links.insert(
                message_id.clone(),
                MessageLink {
                    mirror_channel_id: processed.mirror_channel_id,
                    mirror_message_id: processed.mirror_message_id,
                },
            );
        }
    }

    // The author is always known, even before any census ran.
    snapshot
        .users
        .entry(message.author.id.clone())
        .or_insert_with(|| message.author.username.clone());

    Ok(snapshot)
}

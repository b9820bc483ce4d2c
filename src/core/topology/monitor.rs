// src/core/topology/monitor.rs

//! The channel monitor: discovers source channels missing on the mirror,
//! probes access with the user session, auto-blacklists what it cannot
//! read, and creates the rest while respecting the provider's per-server
//! channel ceiling.

use crate::core::errors::MirrorError;
use crate::core::model::{ChannelMapping, ChannelKind};
use crate::core::state::EngineState;
use crate::core::transport::ChannelAccess;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};
use wildmatch::WildMatch;

/// The provider's hard ceiling on non-category, non-thread channels.
pub const CHANNEL_CAP: usize = 500;

/// The warning threshold ahead of the hard ceiling.
pub const CHANNEL_CAP_WARNING: usize = 450;

/// Silent-retry cap: after this many probes of a blacklisted channel in
/// one session, the monitor stops logging about it entirely.
pub const BLACKLIST_SILENT_RETRY_CAP: u32 = 10;

/// What one monitor pass did.
#[derive(Debug, Default, Clone)]
pub struct MonitorReport {
    pub candidates: usize,
    pub created: usize,
    pub blacklisted: usize,
    pub skipped_ignored: usize,
    pub skipped_blacklisted: usize,
    pub skipped_inactive: usize,
    pub cap_refusals: usize,
}

/// Blacklists lift at the next 03:30 local time, when the source is at its
/// quietest.
pub fn next_blacklist_expiry<Tz: TimeZone>(now: DateTime<Tz>) -> DateTime<Tz> {
    let boundary = NaiveTime::from_hms_opt(3, 30, 0).unwrap_or_default();
    let today = now.date_naive().and_time(boundary);
    let candidate = if now.time() < boundary {
        today
    } else {
        today + ChronoDuration::days(1)
    };
    match now.timezone().from_local_datetime(&candidate) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        // A DST gap swallowed 03:30; push an hour past it.
        chrono::LocalResult::None => now + ChronoDuration::hours(24),
    }
}

/// Runs one monitor pass for the state's pair.
pub async fn run_monitor_pass(state: &Arc<EngineState>) -> Result<MonitorReport, MirrorError> {
    let mut report = MonitorReport::default();

    let source_channels = state
        .observation
        .fetch_guild_channels(&state.pair.source_server_id)
        .await?;
    let mirror_channels = state
        .control
        .fetch_channels(&state.pair.mirror_server_id)
        .await?;
    let mut cap_count = mirror_channels
        .iter()
        .filter(|c| c.kind.counts_toward_cap())
        .count();

    let ignore_globs: Vec<WildMatch> = state
        .config
        .replication
        .ignored_channels
        .iter()
        .map(|p| WildMatch::new(p))
        .collect();

    let now = Utc::now();

    for source in &source_channels {
        // Threads configure themselves on first message; categories only
        // materialize as parents.
        if !source.kind.is_replication_target() || source.kind.is_thread() {
            continue;
        }

        let existing = state
            .store
            .find_channel(&source.id, &state.pair.source_server_id)
            .await?;
        if let Some(mapping) = &existing {
            if mapping.manually_deleted {
                continue;
            }
            if mapping.is_blacklisted_at(now) {
                report.skipped_blacklisted += 1;
                continue;
            }
            if mapping.live_mirror_id().is_some() {
                continue;
            }
        }

        if ignore_globs.iter().any(|g| g.matches(&source.name)) {
            report.skipped_ignored += 1;
            continue;
        }

        report.candidates += 1;

        // Probe first: an inaccessible channel must not burn a creation.
        state.limiter.wait_for_request(&source.id).await;
        state.limiter.record_request(&source.id);
        match state.observation.test_channel_access(&source.id).await? {
            ChannelAccess::Accessible => {}
            ChannelAccess::Denied | ChannelAccess::Missing => {
                blacklist_channel(state, source, existing).await?;
                report.blacklisted += 1;
                continue;
            }
        }

        // A channel silent beyond the inactivity threshold is not worth a
        // creation slot; it comes back through this same path once it
        // wakes up. Channels with no history at all are new and pass.
        let threshold_days = state.config.replication.inactive_threshold_days;
        if threshold_days > 0 {
            state.limiter.wait_for_request(&source.id).await;
            state.limiter.record_request(&source.id);
            if let Ok(messages) = state
                .observation
                .fetch_channel_messages(&source.id, 1, None, None)
                .await
            {
                if let Some(latest) = messages.first() {
                    if now - latest.timestamp > ChronoDuration::days(threshold_days as i64) {
                        report.skipped_inactive += 1;
                        continue;
                    }
                }
            }
        }

        if !creation_allowed(state, cap_count).await {
            report.cap_refusals += 1;
            continue;
        }

        match state.correspondence.auto_create_channel(source).await {
            Ok(created) => {
                cap_count += 1;
                report.created += 1;
                state.notifier.newroom(&source.name, &created.id).await;
            }
            Err(e) => {
                warn!(channel = %source.id, error = %e, "monitor failed to create mirror channel");
                state
                    .notifier
                    .error(
                        "Channel creation failed",
                        &format!("Could not mirror `#{}`: {e}", source.name),
                        None,
                    )
                    .await;
            }
        }
    }

    info!(
        candidates = report.candidates,
        created = report.created,
        blacklisted = report.blacklisted,
        cap_refusals = report.cap_refusals,
        "channel monitor pass complete"
    );
    Ok(report)
}

/// Cap policy: warn once per session from 450 up, refuse (logged once) at
/// 500.
pub async fn creation_allowed(state: &Arc<EngineState>, cap_count: usize) -> bool {
    if cap_count >= CHANNEL_CAP {
        if !state.cap_refusal_logged.swap(true, Ordering::SeqCst) {
            state
                .notifier
                .error(
                    "Channel ceiling reached",
                    &format!(
                        "The mirror holds {cap_count} non-category channels; the provider caps \
                         servers at {CHANNEL_CAP}. No further channels will be created."
                    ),
                    Some("Remove unused mirror channels to resume auto-discovery."),
                )
                .await;
        }
        return false;
    }
    if cap_count >= CHANNEL_CAP_WARNING
        && state
            .session
            .log_throttle
            .try_insert("cap-warning".to_string(), ())
    {
        state
            .notifier
            .admin(&format!(
                "Mirror channel count is at {cap_count} of {CHANNEL_CAP}; auto-discovery stops at the cap."
            ))
            .await;
    }
    true
}

/// Writes the blacklist row and emits the admin notice, silently after the
/// first probe and not at all past the silent-retry cap. Also used by
/// recovery when attempt 2 hits a permission wall.
pub(crate) async fn blacklist_channel(
    state: &Arc<EngineState>,
    source: &crate::core::events::SourceChannel,
    existing: Option<ChannelMapping>,
) -> Result<(), MirrorError> {
    let until_local = next_blacklist_expiry(Local::now());
    let until = until_local.with_timezone(&Utc);

    let mut mapping = existing.unwrap_or_else(|| {
        ChannelMapping::new(
            &source.id,
            &state.pair.source_server_id,
            &source.name,
            source.kind,
        )
    });
    mapping.name = source.name.clone();
    mapping.blacklisted = true;
    mapping.blacklisted_until = Some(until);
    mapping.failed_attempts += 1;
    mapping.scraped = false;
    state.store.upsert_channel(&mapping).await?;
    state.correspondence.invalidate_channel(&source.id);

    let mut first_probe = false;
    let mut past_cap = false;
    state.session.blacklist_silence.update_or_insert(
        source.id.clone(),
        |count| {
            *count += 1;
            past_cap = *count > BLACKLIST_SILENT_RETRY_CAP;
        },
        || {
            first_probe = true;
            1
        },
    );

    if first_probe {
        state
            .notifier
            .admin(&format!(
                "`#{}` is not accessible with the user session; blacklisted until {}.",
                source.name,
                until_local.format("%H:%M")
            ))
            .await;
    } else if !past_cap {
        debug!(channel = %source.id, attempts = mapping.failed_attempts, "blacklisted channel still inaccessible");
    }
    Ok(())
}

/// Counts the mirror channels subject to the cap; shared with tests.
pub fn cap_relevant(kind: ChannelKind) -> bool {
    kind.counts_toward_cap()
}

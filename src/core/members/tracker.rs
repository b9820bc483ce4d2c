// src/core/members/tracker.rs

//! Persists membership observations: the periodic census batch write and
//! the opportunistic per-message upsert.

use super::detector::MemberDetector;
use crate::core::errors::MirrorError;
use crate::core::model::message::SourceAuthor;
use crate::core::model::{LogEntry, LogKind, MemberCount, MemberDetail, PresenceEvent};
use crate::core::state::EngineState;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Batch size for the census bulk writes.
const BULK_CHUNK: usize = 500;

/// One full census: member count sample, detection run, bulk upsert.
#[derive(Debug, Default)]
pub struct CensusReport {
    pub member_count: u64,
    pub unique_detected: usize,
    pub written: u64,
}

/// Runs a census for the state's source server.
pub async fn run_census(
    state: &Arc<EngineState>,
    detector: &mut MemberDetector,
) -> Result<CensusReport, MirrorError> {
    let now = Utc::now();
    let member_count = state
        .observation
        .fetch_guild_member_count(&state.pair.source_server_id)
        .await?;
    state
        .store
        .record_member_count(&MemberCount {
            source_server_id: state.pair.source_server_id.clone(),
            count: member_count,
            timestamp: now,
        })
        .await?;

    let detection = detector.detect(state).await;

    let mut written = 0u64;
    for chunk in detection.members.chunks(BULK_CHUNK) {
        let rows: Vec<MemberDetail> = chunk
            .iter()
            .filter(|m| !m.is_bot)
            .map(|m| {
                MemberDetail::observed(
                    &state.pair.source_server_id,
                    &m.user_id,
                    &m.username,
                    "census",
                    now,
                )
            })
            .collect();
        written += state.store.bulk_upsert_members(&rows).await?;
    }

    let yields = detection
        .yields
        .iter()
        .map(|y| format!("{}: {} ({} new)", y.method, y.found, y.newly_contributed))
        .collect::<Vec<_>>()
        .join(", ");
    info!(
        server = %state.pair.source_server_id,
        count = member_count,
        unique = detection.unique_count(),
        %yields,
        "membership census complete"
    );
    state
        .notifier
        .persist(
            LogEntry::new(
                LogKind::Members,
                &state.pair.mirror_server_id,
                format!(
                    "census: {} members reported, {} detected",
                    member_count,
                    detection.unique_count()
                ),
            )
            .with_details(yields),
        )
        .await;

    Ok(CensusReport {
        member_count,
        unique_detected: detection.unique_count(),
        written,
    })
}

/// Opportunistic upsert for the author of an observed message. Called off
/// the pipeline's critical path; errors surface only at debug level in
/// the caller.
pub async fn observe_author(
    state: &Arc<EngineState>,
    author: &SourceAuthor,
) -> Result<(), MirrorError> {
    let now = Utc::now();
    let mut member = match state
        .store
        .find_member(&state.pair.source_server_id, &author.id)
        .await?
    {
        Some(mut existing) => {
            existing.username = author.username.clone();
            existing.last_seen = now;
            existing.push_history(PresenceEvent {
                timestamp: now,
                method: "message".to_string(),
            });
            existing
        }
        None => MemberDetail::observed(
            &state.pair.source_server_id,
            &author.id,
            &author.username,
            "message",
            now,
        ),
    };

    // Danger scoring: presence across concurrent source servers.
    let presences = state.store.count_member_presences(&author.id).await?;
    member.apply_concurrency(presences.max(1) as usize);

    state.store.upsert_member(&member).await
}

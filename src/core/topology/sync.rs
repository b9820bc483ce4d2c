// src/core/topology/sync.rs

//! The periodic full topology sync.
//!
//! Each pass reconciles the store's correspondence rows against what the
//! source and the mirror actually have: adopting existing mirror channels
//! by name, clearing stale mirror ids, following renames, and mirroring
//! roles through the permission filter. The sync never creates channels;
//! creation belongs to the monitor (cap handling included) and to
//! recovery. Categories are therefore only created on demand, as parents
//! of channels actually being created.

use super::permissions::{
    admin_system_bits, filter_role_permissions, members_system_bits, parse_permission_string,
};
use crate::core::errors::MirrorError;
use crate::core::model::{ChannelMapping, LogEntry, LogKind, RoleMapping};
use crate::core::state::EngineState;
use crate::core::transport::CreateRoleRequest;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Names of the mirror's own system roles.
pub const ADMIN_ROLE_NAME: &str = "Admin";
pub const MEMBERS_ROLE_NAME: &str = "Members";

/// What one sync pass did.
#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    pub channels_seen: usize,
    pub adopted: usize,
    pub repaired: usize,
    pub renamed: usize,
    pub roles_created: usize,
    pub roles_updated: usize,
    pub errors: usize,
}

impl SyncReport {
    pub fn ok(&self) -> bool {
        self.errors == 0
    }
}

/// Runs one full sync pass for the state's mirror server and records the
/// outcome with the adaptive scheduler.
pub async fn run_full_sync(state: &Arc<EngineState>) -> Result<SyncReport, MirrorError> {
    let report = match sync_pass(state).await {
        Ok(report) => report,
        Err(e) => {
            state.sync.record_result(false);
            return Err(e);
        }
    };
    state.sync.record_result(report.ok());
    Ok(report)
}

async fn sync_pass(state: &Arc<EngineState>) -> Result<SyncReport, MirrorError> {
    let mut report = SyncReport::default();

    let source_channels = state
        .observation
        .fetch_guild_channels(&state.pair.source_server_id)
        .await?;
    let mirror_channels = state
        .control
        .fetch_channels(&state.pair.mirror_server_id)
        .await?;

    let mirror_ids: HashSet<&str> = mirror_channels.iter().map(|c| c.id.as_str()).collect();
    // Name-match index for adopting mirror channels that already exist.
    let mut mirror_by_name: HashMap<(String, u8), &crate::core::transport::MirrorChannel> =
        HashMap::new();
    for channel in &mirror_channels {
        mirror_by_name
            .entry((channel.name.clone(), u8::from(channel.kind)))
            .or_insert(channel);
    }

    let _guard = state.topology_lock.lock().await;

    for source in &source_channels {
        // Threads are discovered reactively; voice never replicates.
        if source.kind.is_thread() || source.kind.is_voice_like() {
            continue;
        }
        report.channels_seen += 1;

        let existing = state
            .store
            .find_channel(&source.id, &state.pair.source_server_id)
            .await?;

        match existing {
            Some(mapping) if mapping.manually_deleted => {
                debug!(channel = %source.id, "skipping manually deleted mapping");
            }
            Some(mut mapping) => {
                let mut dirty = false;

                if mapping.name != source.name {
                    mapping.name = source.name.clone();
                    report.renamed += 1;
                    dirty = true;
                }
                if mapping.parent_source_id != source.parent_id {
                    mapping.parent_source_id = source.parent_id.clone();
                    dirty = true;
                }

                let live = mapping
                    .live_mirror_id()
                    .map(|id| mirror_ids.contains(id))
                    .unwrap_or(false);
                if !live {
                    // Stale or pending mirror id: adopt a same-name mirror
                    // channel when one exists, otherwise clear the id so
                    // the monitor or recovery can recreate it. Rows already
                    // awaiting creation are left alone.
                    let adopted = mirror_by_name
                        .get(&(source.name.clone(), u8::from(source.kind)))
                        .map(|c| c.id.clone());
                    match adopted {
                        Some(mirror_id) => {
                            mapping.mirror_channel_id = Some(mirror_id);
                            report.repaired += 1;
                            state.correspondence.invalidate_channel(&source.id);
                            dirty = true;
                        }
                        None if mapping.mirror_channel_id.is_some() => {
                            mapping.mirror_channel_id = None;
                            report.repaired += 1;
                            state.correspondence.invalidate_channel(&source.id);
                            dirty = true;
                        }
                        None => {}
                    }
                }

                if dirty {
                    if let Err(e) = state.correspondence.register_channel_mapping(&mapping).await {
                        warn!(channel = %source.id, error = %e, "failed to update mapping");
                        report.errors += 1;
                    }
                }
            }
            None => {
                // New source channel. Adopt a mirror channel of the same
                // name if one exists; otherwise the monitor will create it.
                if let Some(mirror) =
                    mirror_by_name.get(&(source.name.clone(), u8::from(source.kind)))
                {
                    let mut mapping = ChannelMapping::new(
                        &source.id,
                        &state.pair.source_server_id,
                        &source.name,
                        source.kind,
                    );
                    mapping.mirror_channel_id = Some(mirror.id.clone());
                    mapping.parent_source_id = source.parent_id.clone();
                    mapping.scraped = source.kind.is_replication_target();
                    if let Err(e) = state.correspondence.register_channel_mapping(&mapping).await {
                        warn!(channel = %source.id, error = %e, "failed to adopt mapping");
                        report.errors += 1;
                    } else {
                        report.adopted += 1;
                    }
                }
            }
        }
    }
    drop(_guard);

    sync_roles(state, &mut report).await?;

    info!(
        seen = report.channels_seen,
        adopted = report.adopted,
        repaired = report.repaired,
        renamed = report.renamed,
        roles_created = report.roles_created,
        errors = report.errors,
        "topology sync pass complete"
    );
    Ok(report)
}

/// Mirrors source roles through the permission filter. `@everyone` is
/// never mapped.
async fn sync_roles(state: &Arc<EngineState>, report: &mut SyncReport) -> Result<(), MirrorError> {
    let source_roles = state
        .observation
        .fetch_guild_roles(&state.pair.source_server_id)
        .await?;
    let mirror_roles = state
        .control
        .fetch_roles(&state.pair.mirror_server_id)
        .await?;
    let mirror_role_ids: HashSet<&str> = mirror_roles.iter().map(|r| r.id.as_str()).collect();

    for source in &source_roles {
        if source.is_everyone {
            continue;
        }
        let filtered = filter_role_permissions(parse_permission_string(&source.permissions));
        let existing = state
            .store
            .find_role(&source.id, &state.pair.source_server_id)
            .await?;

        match existing {
            Some(mut mapping) => {
                let live = mapping
                    .mirror_role_id
                    .as_deref()
                    .map(|id| mirror_role_ids.contains(id))
                    .unwrap_or(false);
                if live && mapping.name == source.name && mapping.synced {
                    continue;
                }
                if live {
                    let mirror_role_id = mapping.mirror_role_id.clone().unwrap_or_default();
                    if let Err(e) = state
                        .control
                        .update_role(
                            &state.pair.mirror_server_id,
                            &mirror_role_id,
                            CreateRoleRequest {
                                name: source.name.clone(),
                                permissions: filtered,
                                mentionable: true,
                            },
                        )
                        .await
                    {
                        warn!(role = %source.id, error = %e, "failed to update mirror role");
                        report.errors += 1;
                        continue;
                    }
                    mapping.name = source.name.clone();
                    mapping.synced = true;
                    report.roles_updated += 1;
                    if let Err(e) = state.correspondence.register_role_mapping(&mapping).await {
                        warn!(role = %source.id, error = %e, "failed to persist role mapping");
                        report.errors += 1;
                    }
                } else {
                    state.correspondence.invalidate_role(&source.id);
                    if let Err(e) = create_mirror_role(state, source, filtered, report).await {
                        warn!(role = %source.id, error = %e, "failed to recreate mirror role");
                        report.errors += 1;
                    }
                }
            }
            None => {
                if let Err(e) = create_mirror_role(state, source, filtered, report).await {
                    warn!(role = %source.id, error = %e, "failed to create mirror role");
                    report.errors += 1;
                }
            }
        }
    }
    Ok(())
}

async fn create_mirror_role(
    state: &Arc<EngineState>,
    source: &crate::core::events::SourceRole,
    filtered_permissions: u64,
    report: &mut SyncReport,
) -> Result<(), MirrorError> {
    let created = state
        .control
        .create_role(
            &state.pair.mirror_server_id,
            CreateRoleRequest {
                name: source.name.clone(),
                permissions: filtered_permissions,
                mentionable: true,
            },
        )
        .await?;
    let mut mapping = RoleMapping::new(&source.id, &state.pair.source_server_id, &source.name);
    mapping.mirror_role_id = Some(created.id);
    mapping.synced = true;
    state.correspondence.register_role_mapping(&mapping).await?;
    report.roles_created += 1;
    state
        .notifier
        .persist(LogEntry::new(
            LogKind::Roles,
            &state.pair.mirror_server_id,
            format!("mirrored role '{}'", source.name),
        ))
        .await;
    Ok(())
}

/// Mirrors a single newly observed source role, outside a full sync pass.
pub async fn mirror_new_role(
    state: &Arc<EngineState>,
    source: &crate::core::events::SourceRole,
) -> Result<(), MirrorError> {
    if source.is_everyone {
        return Ok(());
    }
    if state
        .store
        .find_role(&source.id, &state.pair.source_server_id)
        .await?
        .is_some()
    {
        return Ok(());
    }
    let filtered = filter_role_permissions(parse_permission_string(&source.permissions));
    let mut report = SyncReport::default();
    create_mirror_role(state, source, filtered, &mut report).await
}

/// Boot-time pass over the mirror's own system roles. The admin role gets
/// exactly its required bits; the members role is augmented with missing
/// bits, never replaced.
pub async fn ensure_system_roles(state: &Arc<EngineState>) -> Result<(), MirrorError> {
    let roles = state
        .control
        .fetch_roles(&state.pair.mirror_server_id)
        .await?;

    match roles.iter().find(|r| r.name == ADMIN_ROLE_NAME) {
        Some(role) if role.permissions == admin_system_bits() => {}
        Some(role) => {
            state
                .control
                .update_role(
                    &state.pair.mirror_server_id,
                    &role.id,
                    CreateRoleRequest {
                        name: ADMIN_ROLE_NAME.to_string(),
                        permissions: admin_system_bits(),
                        mentionable: false,
                    },
                )
                .await?;
        }
        None => {
            state
                .control
                .create_role(
                    &state.pair.mirror_server_id,
                    CreateRoleRequest {
                        name: ADMIN_ROLE_NAME.to_string(),
                        permissions: admin_system_bits(),
                        mentionable: false,
                    },
                )
                .await?;
        }
    }

    match roles.iter().find(|r| r.name == MEMBERS_ROLE_NAME) {
        Some(role) => {
            let required = members_system_bits();
            if role.permissions & required != required {
                state
                    .control
                    .update_role(
                        &state.pair.mirror_server_id,
                        &role.id,
                        CreateRoleRequest {
                            name: MEMBERS_ROLE_NAME.to_string(),
                            // Augment: existing bits are kept.
                            permissions: role.permissions | required,
                            mentionable: false,
                        },
                    )
                    .await?;
            }
        }
        None => {
            state
                .control
                .create_role(
                    &state.pair.mirror_server_id,
                    CreateRoleRequest {
                        name: MEMBERS_ROLE_NAME.to_string(),
                        permissions: members_system_bits(),
                        mentionable: false,
                    },
                )
                .await?;
        }
    }

    Ok(())
}

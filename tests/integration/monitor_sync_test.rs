// tests/integration/monitor_sync_test.rs

use super::test_helpers::{SRC_SERVER, harness, harness_with_config, test_config};
use specular::core::model::{ChannelKind, LogKind};
use specular::core::events::SourceRole;
use specular::core::topology::monitor::{self, CHANNEL_CAP};
use specular::core::topology::permissions::Permissions;
use specular::core::store::Store;
use specular::core::topology::sync;

const SRC_PRIV: &str = "11111111111111111111";
const SRC_OPEN: &str = "12222222222222222222";

#[tokio::test(start_paused = true)]
async fn test_monitor_creates_accessible_channels() {
    let h = harness();
    h.observation.seed_channel(SRC_OPEN, "open-talk", ChannelKind::Text);

    let report = monitor::run_monitor_pass(&h.state).await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.created, 1);

    let row = h.store.find_channel(SRC_OPEN, SRC_SERVER).await.unwrap().unwrap();
    assert!(row.live_mirror_id().is_some());
    assert!(row.scraped);

    // Success notification in the newroom channel.
    assert!(
        h.control
            .posted
            .lock()
            .iter()
            .any(|(chan, _, _)| chan == "newroom-channel")
    );
}

#[tokio::test(start_paused = true)]
async fn test_monitor_blacklists_inaccessible_channel_once() {
    let h = harness();
    h.observation
        .seed_channel(SRC_PRIV, "private-stuff", ChannelKind::Text);
    h.observation.deny_access(SRC_PRIV);

    let report = monitor::run_monitor_pass(&h.state).await.unwrap();
    assert_eq!(report.blacklisted, 1);
    assert_eq!(report.created, 0);

    let row = h.store.find_channel(SRC_PRIV, SRC_SERVER).await.unwrap().unwrap();
    assert!(row.blacklisted);
    assert_eq!(row.failed_attempts, 1);
    let until = row.blacklisted_until.expect("expiry recorded");
    assert!(until > chrono::Utc::now());

    let admin_logs = h
        .store
        .log_entries()
        .into_iter()
        .filter(|e| e.kind == LogKind::Admin && e.message.contains("private-stuff"))
        .count();
    assert_eq!(admin_logs, 1);

    // Further passes in the same session stay silent for this channel.
    let second = monitor::run_monitor_pass(&h.state).await.unwrap();
    assert_eq!(second.skipped_blacklisted, 1);
    let admin_logs_after = h
        .store
        .log_entries()
        .into_iter()
        .filter(|e| e.kind == LogKind::Admin && e.message.contains("private-stuff"))
        .count();
    assert_eq!(admin_logs_after, 1);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_skips_ignored_channels() {
    let mut config = test_config();
    config.replication.ignored_channels = vec!["*-logs".to_string()];
    let h = harness_with_config(config);
    h.observation.seed_channel(SRC_OPEN, "mod-logs", ChannelKind::Text);

    let report = monitor::run_monitor_pass(&h.state).await.unwrap();
    assert_eq!(report.skipped_ignored, 1);
    assert_eq!(report.created, 0);
    assert!(h.store.find_channel(SRC_OPEN, SRC_SERVER).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_skips_channels_past_inactivity_threshold() {
    let h = harness();
    h.observation.seed_channel(SRC_OPEN, "dusty-archive", ChannelKind::Text);
    let mut stale = super::test_helpers::message("16000000000000000001", SRC_OPEN, "long ago");
    stale.timestamp = chrono::Utc::now() - chrono::Duration::days(45);
    h.observation.seed_history(SRC_OPEN, vec![stale]);

    let report = monitor::run_monitor_pass(&h.state).await.unwrap();
    assert_eq!(report.skipped_inactive, 1);
    assert_eq!(report.created, 0);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_refuses_at_hard_cap_and_logs_once() {
    let h = harness();
    h.control.seed_bulk_channels(CHANNEL_CAP);
    h.observation.seed_channel(SRC_OPEN, "one-too-many", ChannelKind::Text);

    let report = monitor::run_monitor_pass(&h.state).await.unwrap();
    assert_eq!(report.cap_refusals, 1);
    assert_eq!(report.created, 0);

    let cap_errors = h
        .store
        .log_entries()
        .into_iter()
        .filter(|e| e.kind == LogKind::Error && e.message.contains("ceiling"))
        .count();
    assert_eq!(cap_errors, 1);

    // The refusal is logged once per session, not once per pass.
    monitor::run_monitor_pass(&h.state).await.unwrap();
    let cap_errors_after = h
        .store
        .log_entries()
        .into_iter()
        .filter(|e| e.kind == LogKind::Error && e.message.contains("ceiling"))
        .count();
    assert_eq!(cap_errors_after, 1);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_warns_once_between_warning_and_cap() {
    let h = harness();
    h.control.seed_bulk_channels(460);
    h.observation.seed_channel(SRC_OPEN, "fits-still", ChannelKind::Text);
    h.observation.seed_channel(SRC_PRIV, "fits-too", ChannelKind::Text);

    let report = monitor::run_monitor_pass(&h.state).await.unwrap();
    assert_eq!(report.created, 2);

    let warnings = h
        .store
        .log_entries()
        .into_iter()
        .filter(|e| e.kind == LogKind::Admin && e.message.contains("auto-discovery stops"))
        .count();
    assert_eq!(warnings, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sync_adopts_mirror_channel_by_name() {
    let h = harness();
    h.observation.seed_channel(SRC_OPEN, "general", ChannelKind::Text);
    h.control
        .seed_channel("21111111111111111111", "general", ChannelKind::Text);

    let report = sync::run_full_sync(&h.state).await.unwrap();
    assert_eq!(report.adopted, 1);

    let row = h.store.find_channel(SRC_OPEN, SRC_SERVER).await.unwrap().unwrap();
    assert_eq!(row.live_mirror_id(), Some("21111111111111111111"));
}

#[tokio::test(start_paused = true)]
async fn test_sync_repairs_stale_mapping_and_follows_rename() {
    let h = harness();
    h.observation.seed_channel(SRC_OPEN, "renamed-room", ChannelKind::Text);
    let mut mapping = specular::core::model::ChannelMapping::new(
        SRC_OPEN,
        SRC_SERVER,
        "old-name",
        ChannelKind::Text,
    );
    mapping.mirror_channel_id = Some("29999999999999999999".to_string());
    h.store.upsert_channel(&mapping).await.unwrap();

    let report = sync::run_full_sync(&h.state).await.unwrap();
    assert_eq!(report.repaired, 1);
    assert_eq!(report.renamed, 1);

    let row = h.store.find_channel(SRC_OPEN, SRC_SERVER).await.unwrap().unwrap();
    assert_eq!(row.name, "renamed-room");
    // The dead mirror id was cleared so discovery can recreate it.
    assert_eq!(row.live_mirror_id(), None);
}

#[tokio::test(start_paused = true)]
async fn test_sync_mirrors_roles_through_the_filter() {
    let h = harness();
    let dangerous = (Permissions::ADMINISTRATOR | Permissions::SEND_MESSAGES).bits();
    h.observation.roles.lock().push(SourceRole {
        id: "13333333333333333333".to_string(),
        server_id: SRC_SERVER.to_string(),
        name: "overlords".to_string(),
        permissions: dangerous.to_string(),
        is_everyone: false,
    });
    h.observation.roles.lock().push(SourceRole {
        id: SRC_SERVER.to_string(),
        server_id: SRC_SERVER.to_string(),
        name: "@everyone".to_string(),
        permissions: "0".to_string(),
        is_everyone: true,
    });

    let report = sync::run_full_sync(&h.state).await.unwrap();
    assert_eq!(report.roles_created, 1);

    let mirror_roles = h.control.roles.lock().clone();
    let created = mirror_roles.iter().find(|r| r.name == "overlords").unwrap();
    assert_eq!(created.permissions, Permissions::SAFE_MINIMAL.bits());

    // @everyone is never mapped.
    assert!(
        h.store
            .find_role(SRC_SERVER, SRC_SERVER)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test(start_paused = true)]
async fn test_ensure_system_roles_augments_members() {
    let h = harness();
    // A members role already exists with an extra bit of its own.
    h.control.roles.lock().push(specular::core::transport::MirrorRole {
        id: "25555555555555555555".to_string(),
        name: "Members".to_string(),
        permissions: Permissions::CHANGE_NICKNAME.bits(),
    });

    sync::ensure_system_roles(&h.state).await.unwrap();

    let updates = h.control.updated_roles.lock().clone();
    let (_, request) = updates
        .iter()
        .find(|(id, _)| id == "25555555555555555555")
        .expect("members role augmented");
    let bits = Permissions::from_bits_truncate(request.permissions);
    // Existing bits kept, required bits added.
    assert!(bits.contains(Permissions::CHANGE_NICKNAME));
    assert!(bits.contains(Permissions::SAFE_MINIMAL));

    // The admin role was created with exactly its required bits.
    let admin = h
        .control
        .roles
        .lock()
        .iter()
        .find(|r| r.name == "Admin")
        .cloned()
        .expect("admin role created");
    assert_eq!(admin.permissions, Permissions::ADMINISTRATOR.bits());
}

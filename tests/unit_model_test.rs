// tests/unit_model_test.rs

use chrono::{Duration as ChronoDuration, Utc};
use specular::core::model::channel::PENDING_MIRROR_ID;
use specular::core::model::member::MAX_HISTORY_ENTRIES;
use specular::core::model::{ChannelKind, ChannelMapping, MemberDetail, PresenceEvent};

#[test]
fn test_channel_kind_codes_round_trip() {
    for (kind, code) in [
        (ChannelKind::Text, 0u8),
        (ChannelKind::Voice, 2),
        (ChannelKind::Category, 4),
        (ChannelKind::News, 5),
        (ChannelKind::NewsThread, 10),
        (ChannelKind::PublicThread, 11),
        (ChannelKind::PrivateThread, 12),
        (ChannelKind::Stage, 13),
        (ChannelKind::Forum, 15),
    ] {
        assert_eq!(u8::from(kind), code);
        assert_eq!(ChannelKind::from(code), kind);
    }
    assert_eq!(ChannelKind::from(77), ChannelKind::Unknown(77));
}

#[test]
fn test_voice_and_category_are_never_targets() {
    assert!(!ChannelKind::Voice.is_replication_target());
    assert!(!ChannelKind::Stage.is_replication_target());
    assert!(!ChannelKind::Category.is_replication_target());
    assert!(ChannelKind::Text.is_replication_target());
    assert!(ChannelKind::Forum.is_replication_target());
    assert!(ChannelKind::PublicThread.is_replication_target());
}

#[test]
fn test_cap_counts_exclude_categories_and_threads() {
    assert!(ChannelKind::Text.counts_toward_cap());
    assert!(ChannelKind::Voice.counts_toward_cap());
    assert!(!ChannelKind::Category.counts_toward_cap());
    assert!(!ChannelKind::PublicThread.counts_toward_cap());
    assert!(!ChannelKind::NewsThread.counts_toward_cap());
}

#[test]
fn test_live_mirror_id_filters_pending_sentinel() {
    let mut mapping = ChannelMapping::new("src", "server", "general", ChannelKind::Text);
    assert_eq!(mapping.live_mirror_id(), None);
    mapping.mirror_channel_id = Some(PENDING_MIRROR_ID.to_string());
    assert_eq!(mapping.live_mirror_id(), None);
    mapping.mirror_channel_id = Some("mirror-1".to_string());
    assert_eq!(mapping.live_mirror_id(), Some("mirror-1"));
}

#[test]
fn test_blacklist_expires_at_boundary() {
    let now = Utc::now();
    let mut mapping = ChannelMapping::new("src", "server", "general", ChannelKind::Text);
    assert!(!mapping.is_blacklisted_at(now));
    mapping.blacklisted = true;
    mapping.blacklisted_until = Some(now + ChronoDuration::hours(1));
    assert!(mapping.is_blacklisted_at(now));
    assert!(!mapping.is_blacklisted_at(now + ChronoDuration::hours(2)));
    // No boundary recorded means indefinitely blacklisted.
    mapping.blacklisted_until = None;
    assert!(mapping.is_blacklisted_at(now));
}

#[test]
fn test_member_history_is_bounded() {
    let now = Utc::now();
    let mut member = MemberDetail::observed("server", "user", "alice", "message", now);
    for n in 0..150 {
        member.push_history(PresenceEvent {
            timestamp: now + ChronoDuration::seconds(n),
            method: "message".to_string(),
        });
    }
    assert_eq!(member.history.len(), MAX_HISTORY_ENTRIES);
    // Oldest entries were evicted first.
    assert_eq!(
        member.history.last().unwrap().timestamp,
        now + ChronoDuration::seconds(149)
    );
}

#[test]
fn test_danger_scoring_from_concurrency() {
    let mut member = MemberDetail::observed("server", "user", "alice", "census", Utc::now());
    member.apply_concurrency(1);
    assert_eq!(member.danger_level, 0);
    assert!(!member.is_dangerous);
    member.apply_concurrency(2);
    assert_eq!(member.danger_level, 1);
    assert!(!member.is_dangerous);
    member.apply_concurrency(3);
    assert_eq!(member.danger_level, 2);
    assert!(member.is_dangerous);
    member.apply_concurrency(10);
    assert_eq!(member.danger_level, 3);
    assert!(member.is_dangerous);
}

#[test]
fn test_channel_mapping_serializes_with_store_field_names() {
    let mut mapping = ChannelMapping::new("src-1", "server-1", "general", ChannelKind::Text);
    mapping.mirror_channel_id = Some("mir-1".to_string());
    let json = serde_json::to_value(&mapping).unwrap();
    assert_eq!(json["sourceChannelId"], "src-1");
    assert_eq!(json["serverId"], "server-1");
    assert_eq!(json["discordId"], "mir-1");
    assert_eq!(json["kind"], 0);
}

#[test]
fn test_absent_mirror_id_is_omitted_from_documents() {
    let mapping = ChannelMapping::new("src-1", "server-1", "general", ChannelKind::Text);
    let json = serde_json::to_value(&mapping).unwrap();
    assert!(json.get("discordId").is_none());
}

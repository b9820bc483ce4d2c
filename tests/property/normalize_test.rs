// tests/property/normalize_test.rs

use proptest::prelude::*;
use specular::core::pipeline::normalize::{
    ChannelRef, MappingSnapshot, RoleRef, rewrite,
};
use specular::core::transport::payload::{MAX_CONTENT_CHARS, clamp_content};

fn provider_id() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[1-9][0-9]{16,19}").expect("valid regex")
}

/// Message fragments: plain words mixed with every mention form the
/// provider knows.
fn fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 .,!?]{0,24}".prop_map(|s| s),
        provider_id().prop_map(|id| format!("<#{id}>")),
        provider_id().prop_map(|id| format!("<@{id}>")),
        provider_id().prop_map(|id| format!("<@!{id}>")),
        provider_id().prop_map(|id| format!("<@&{id}>")),
        Just("@everyone".to_string()),
        Just("@here".to_string()),
    ]
}

fn content() -> impl Strategy<Value = String> {
    proptest::collection::vec(fragment(), 0..12).prop_map(|parts| parts.join(" "))
}

fn empty_snapshot() -> MappingSnapshot {
    MappingSnapshot {
        source_server_id: "10000000000000000001".to_string(),
        mirror_server_id: "20000000000000000001".to_string(),
        ..Default::default()
    }
}

fn mapped_snapshot() -> MappingSnapshot {
    let mut snap = empty_snapshot();
    snap.channels.insert(
        "11111111111111111111".to_string(),
        ChannelRef {
            mirror_id: Some("21111111111111111111".to_string()),
            name: "general".to_string(),
        },
    );
    snap.roles.insert(
        "13333333333333333333".to_string(),
        RoleRef {
            mirror_id: Some("23333333333333333333".to_string()),
            name: "raiders".to_string(),
        },
    );
    snap
}

proptest! {
    /// No user mention syntax ever survives rewriting, mapped or not.
    #[test]
    fn prop_no_live_user_mentions(raw in content()) {
        for snapshot in [empty_snapshot(), mapped_snapshot()] {
            let out = rewrite(&raw, &snapshot);
            prop_assert!(!out.text.contains("<@!"));
            // Role mentions <@&id> may stay; plain user mentions may not.
            let stripped = out.text.replace("<@&", "");
            prop_assert!(!stripped.contains("<@"));
        }
    }

    /// Mass mentions are always neutralized in the rewritten text.
    #[test]
    fn prop_no_live_everyone(raw in content()) {
        let out = rewrite(&raw, &empty_snapshot());
        prop_assert!(!out.text.contains("@everyone"));
        prop_assert!(!out.text.contains("@here"));
    }

    /// With no mappings, rewriting is a fixed point after one pass.
    #[test]
    fn prop_rewrite_stabilizes(raw in content()) {
        let once = rewrite(&raw, &empty_snapshot());
        let twice = rewrite(&once.text, &empty_snapshot());
        prop_assert_eq!(&once.text, &twice.text);
        prop_assert!(twice.pending_channels.is_empty() || !once.pending_channels.is_empty());
    }

    /// Every unmapped channel reference is accounted for as a pending
    /// creation; live role ids only come out of the mapping.
    #[test]
    fn prop_pending_matches_unmapped(raw in content()) {
        let out = rewrite(&raw, &mapped_snapshot());
        for pending in &out.pending_channels {
            prop_assert_ne!(&pending.source_channel_id, "11111111111111111111");
        }
        for live in &out.live_role_ids {
            prop_assert_eq!(live.as_str(), "23333333333333333333");
        }
    }

    /// The clamp never exceeds the limit and never touches short content.
    #[test]
    fn prop_clamp_respects_limit(raw in ".{0,4000}") {
        let clamped = clamp_content(&raw);
        prop_assert!(clamped.chars().count() <= MAX_CONTENT_CHARS);
        if raw.chars().count() <= MAX_CONTENT_CHARS {
            prop_assert_eq!(clamped, raw);
        } else {
            prop_assert!(clamped.ends_with('…'));
        }
    }
}

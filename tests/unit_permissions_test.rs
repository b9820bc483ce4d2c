// tests/unit_permissions_test.rs

use specular::core::topology::permissions::{
    Permissions, admin_system_bits, filter_role_permissions, members_system_bits,
    parse_permission_string,
};

#[test]
fn test_administrator_collapses_to_safe_minimal() {
    let raw = (Permissions::ADMINISTRATOR
        | Permissions::MANAGE_GUILD
        | Permissions::BAN_MEMBERS
        | Permissions::SEND_MESSAGES)
        .bits();
    assert_eq!(filter_role_permissions(raw), Permissions::SAFE_MINIMAL.bits());
}

#[test]
fn test_admin_result_carries_no_privileged_bit() {
    let filtered = Permissions::from_bits_truncate(filter_role_permissions(
        Permissions::ADMINISTRATOR.bits(),
    ));
    for forbidden in [
        Permissions::ADMINISTRATOR,
        Permissions::MANAGE_CHANNELS,
        Permissions::MANAGE_GUILD,
        Permissions::MANAGE_ROLES,
        Permissions::MANAGE_WEBHOOKS,
        Permissions::MENTION_EVERYONE,
        Permissions::KICK_MEMBERS,
        Permissions::BAN_MEMBERS,
        Permissions::MODERATE_MEMBERS,
    ] {
        assert!(!filtered.contains(forbidden), "{forbidden:?} must be stripped");
    }
}

#[test]
fn test_management_bits_always_zeroed() {
    let raw = (Permissions::SEND_MESSAGES
        | Permissions::MANAGE_MESSAGES
        | Permissions::MANAGE_THREADS
        | Permissions::MANAGE_EVENTS
        | Permissions::PRIORITY_SPEAKER
        | Permissions::MUTE_MEMBERS
        | Permissions::DEAFEN_MEMBERS
        | Permissions::MOVE_MEMBERS
        | Permissions::SEND_TTS_MESSAGES
        | Permissions::MENTION_EVERYONE)
        .bits();
    let filtered = Permissions::from_bits_truncate(filter_role_permissions(raw));
    assert_eq!(filtered, Permissions::SEND_MESSAGES);
}

#[test]
fn test_safe_bits_survive() {
    let raw = (Permissions::VIEW_CHANNEL
        | Permissions::SEND_MESSAGES
        | Permissions::ADD_REACTIONS
        | Permissions::EMBED_LINKS
        | Permissions::ATTACH_FILES
        | Permissions::CONNECT
        | Permissions::SPEAK)
        .bits();
    assert_eq!(filter_role_permissions(raw), raw);
}

#[test]
fn test_unknown_high_bits_are_dropped() {
    let raw = Permissions::SEND_MESSAGES.bits() | (1 << 55);
    assert_eq!(filter_role_permissions(raw), Permissions::SEND_MESSAGES.bits());
}

#[test]
fn test_parse_permission_string() {
    assert_eq!(parse_permission_string("2048"), 2048);
    assert_eq!(parse_permission_string("garbage"), 0);
    assert_eq!(parse_permission_string(""), 0);
}

#[test]
fn test_system_role_bits() {
    assert_eq!(admin_system_bits(), Permissions::ADMINISTRATOR.bits());
    let members = Permissions::from_bits_truncate(members_system_bits());
    assert!(members.contains(Permissions::SAFE_MINIMAL));
    assert!(!members.contains(Permissions::MENTION_EVERYONE));
}

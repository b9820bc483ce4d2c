// src/core/topology/permissions.rs

//! The security filter applied to every permission bitmap that crosses
//! from the source onto a mirror role.
//!
//! Mirrored roles must never carry management, moderation or mass-mention
//! power on the mirror: a role that is harmless on the source would
//! otherwise become an attack surface on a server the operator controls.

use bitflags::bitflags;

bitflags! {
    /// The provider's permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u64 {
        const CREATE_INSTANT_INVITE = 1 << 0;
        const KICK_MEMBERS = 1 << 1;
        const BAN_MEMBERS = 1 << 2;
        const ADMINISTRATOR = 1 << 3;
        const MANAGE_CHANNELS = 1 << 4;
        const MANAGE_GUILD = 1 << 5;
        const ADD_REACTIONS = 1 << 6;
        const VIEW_AUDIT_LOG = 1 << 7;
        const PRIORITY_SPEAKER = 1 << 8;
        const STREAM = 1 << 9;
        const VIEW_CHANNEL = 1 << 10;
        const SEND_MESSAGES = 1 << 11;
        const SEND_TTS_MESSAGES = 1 << 12;
        const MANAGE_MESSAGES = 1 << 13;
        const EMBED_LINKS = 1 << 14;
        const ATTACH_FILES = 1 << 15;
        const READ_MESSAGE_HISTORY = 1 << 16;
        const MENTION_EVERYONE = 1 << 17;
        const USE_EXTERNAL_EMOJIS = 1 << 18;
        const VIEW_GUILD_INSIGHTS = 1 << 19;
        const CONNECT = 1 << 20;
        const SPEAK = 1 << 21;
        const MUTE_MEMBERS = 1 << 22;
        const DEAFEN_MEMBERS = 1 << 23;
        const MOVE_MEMBERS = 1 << 24;
        const USE_VAD = 1 << 25;
        const CHANGE_NICKNAME = 1 << 26;
        const MANAGE_NICKNAMES = 1 << 27;
        const MANAGE_ROLES = 1 << 28;
        const MANAGE_WEBHOOKS = 1 << 29;
        const MANAGE_GUILD_EXPRESSIONS = 1 << 30;
        const USE_APPLICATION_COMMANDS = 1 << 31;
        const REQUEST_TO_SPEAK = 1 << 32;
        const MANAGE_EVENTS = 1 << 33;
        const MANAGE_THREADS = 1 << 34;
        const CREATE_PUBLIC_THREADS = 1 << 35;
        const CREATE_PRIVATE_THREADS = 1 << 36;
        const USE_EXTERNAL_STICKERS = 1 << 37;
        const SEND_MESSAGES_IN_THREADS = 1 << 38;
        const USE_EMBEDDED_ACTIVITIES = 1 << 39;
        const MODERATE_MEMBERS = 1 << 40;
    }
}

impl Permissions {
    /// The minimal set granted when the source role carried the
    /// administrator bit: ordinary participation, nothing structural.
    pub const SAFE_MINIMAL: Permissions = Permissions::VIEW_CHANNEL
        .union(Permissions::SEND_MESSAGES)
        .union(Permissions::READ_MESSAGE_HISTORY)
        .union(Permissions::ADD_REACTIONS)
        .union(Permissions::USE_EXTERNAL_EMOJIS)
        .union(Permissions::ATTACH_FILES)
        .union(Permissions::EMBED_LINKS)
        .union(Permissions::CONNECT)
        .union(Permissions::SPEAK)
        .union(Permissions::USE_VAD);

    /// The full allow-list for non-administrator roles. Everything outside
    /// it (membership management, channel management, moderation, webhooks,
    /// mentioning everyone, priority speaker, move/mute/deafen, thread and
    /// event management, TTS) is always zeroed.
    pub const SAFE_ALLOWLIST: Permissions = Permissions::SAFE_MINIMAL
        .union(Permissions::STREAM)
        .union(Permissions::CHANGE_NICKNAME)
        .union(Permissions::USE_APPLICATION_COMMANDS)
        .union(Permissions::REQUEST_TO_SPEAK)
        .union(Permissions::CREATE_PUBLIC_THREADS)
        .union(Permissions::SEND_MESSAGES_IN_THREADS)
        .union(Permissions::USE_EXTERNAL_STICKERS)
        .union(Permissions::USE_EMBEDDED_ACTIVITIES);
}

/// Rewrites a source role's permission bitmap for the mirror.
pub fn filter_role_permissions(raw: u64) -> u64 {
    let source = Permissions::from_bits_truncate(raw);
    if source.contains(Permissions::ADMINISTRATOR) {
        return Permissions::SAFE_MINIMAL.bits();
    }
    (source & Permissions::SAFE_ALLOWLIST).bits()
}

/// Parses the provider's decimal-string bitmap format.
pub fn parse_permission_string(raw: &str) -> u64 {
    raw.parse().unwrap_or(0)
}

/// Bits of the mirror's own `Admin` system role.
pub fn admin_system_bits() -> u64 {
    Permissions::ADMINISTRATOR.bits()
}

/// Bits required on the mirror's `Members` system role. The boot pass
/// augments an existing role with whatever is missing rather than
/// replacing it.
pub fn members_system_bits() -> u64 {
    (Permissions::SAFE_MINIMAL
        | Permissions::CREATE_PUBLIC_THREADS
        | Permissions::SEND_MESSAGES_IN_THREADS)
        .bits()
}

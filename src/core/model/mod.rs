// src/core/model/mod.rs

//! Persisted entities and wire payload types shared across the engine.
//!
//! Identifiers are opaque strings assigned by the upstream provider; the
//! engine never parses them beyond equality and map keys. Serde renames keep
//! the store documents compatible with the collection contracts (camelCase
//! field names, `discordId` for the mirror-side or primary id).

pub mod channel;
pub mod log;
pub mod member;
pub mod message;
pub mod role;

pub use channel::{ChannelKind, ChannelMapping, PENDING_MIRROR_ID};
pub use log::{LogEntry, LogKind, RoleMentionRecord};
pub use member::{MemberCount, MemberDetail, PresenceEvent};
pub use message::{Attachment, Embed, EmbedAuthor, EmbedField, EmbedFooter, SourceAuthor, SourceMessage};
pub use role::RoleMapping;

use serde::{Deserialize, Serialize};

/// One replication domain: a mirror server paired with exactly one source
/// server. Threaded explicitly through the pipeline instead of living in
/// ambient per-server singletons, so tests can construct isolated instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPair {
    #[serde(rename = "sourceServerId")]
    pub source_server_id: String,
    #[serde(rename = "mirrorServerId")]
    pub mirror_server_id: String,
}

impl ServerPair {
    pub fn new(source_server_id: impl Into<String>, mirror_server_id: impl Into<String>) -> Self {
        Self {
            source_server_id: source_server_id.into(),
            mirror_server_id: mirror_server_id.into(),
        }
    }
}

/// Operator-tunable per-pair settings persisted in the `ServerConfig`
/// collection. Survives the emergency purge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub mirror_server_id: String,
    pub source_server_id: String,
    #[serde(default)]
    pub error_channel_id: Option<String>,
    #[serde(default)]
    pub newroom_channel_id: Option<String>,
    #[serde(default)]
    pub admin_channel_id: Option<String>,
    #[serde(default)]
    pub mention_channel_id: Option<String>,
}

/// A channel name blacklisted from outbound mention notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionBlacklist {
    pub source_guild_id: String,
    pub channel_name: String,
}

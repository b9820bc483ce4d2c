// src/core/model/channel.rs

//! Channel correspondence rows and the provider's numeric channel-kind codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Sentinel stored in place of a mirror id while creation is still in
/// flight. A mapping carrying this value is repairable by the sync loop but
/// is not a usable replication target.
pub const PENDING_MIRROR_ID: &str = "pending";

/// The provider's numeric channel-kind codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    News,
    NewsThread,
    PublicThread,
    PrivateThread,
    Stage,
    Forum,
    Unknown(u8),
}

impl From<u8> for ChannelKind {
    fn from(code: u8) -> Self {
        match code {
            0 => ChannelKind::Text,
            2 => ChannelKind::Voice,
            4 => ChannelKind::Category,
            5 => ChannelKind::News,
            10 => ChannelKind::NewsThread,
            11 => ChannelKind::PublicThread,
            12 => ChannelKind::PrivateThread,
            13 => ChannelKind::Stage,
            15 => ChannelKind::Forum,
            other => ChannelKind::Unknown(other),
        }
    }
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Text => 0,
            ChannelKind::Voice => 2,
            ChannelKind::Category => 4,
            ChannelKind::News => 5,
            ChannelKind::NewsThread => 10,
            ChannelKind::PublicThread => 11,
            ChannelKind::PrivateThread => 12,
            ChannelKind::Stage => 13,
            ChannelKind::Forum => 15,
            ChannelKind::Unknown(other) => other,
        }
    }
}

impl ChannelKind {
    pub fn is_thread(&self) -> bool {
        matches!(
            self,
            ChannelKind::NewsThread | ChannelKind::PublicThread | ChannelKind::PrivateThread
        )
    }

    pub fn is_category(&self) -> bool {
        matches!(self, ChannelKind::Category)
    }

    /// Voice and stage channels carry no replicable text stream.
    pub fn is_voice_like(&self) -> bool {
        matches!(self, ChannelKind::Voice | ChannelKind::Stage)
    }

    /// Voice and category channels are never replication targets; categories
    /// still participate as parents.
    pub fn is_replication_target(&self) -> bool {
        !self.is_voice_like() && !self.is_category() && !matches!(self, ChannelKind::Unknown(_))
    }

    /// The provider's per-server channel ceiling counts neither categories
    /// nor threads.
    pub fn counts_toward_cap(&self) -> bool {
        !self.is_category() && !self.is_thread()
    }
}

/// One source↔mirror channel correspondence row.
///
/// Uniqueness: `(sourceChannelId, serverId)`; `discordId` unique when
/// present and not the pending sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMapping {
    pub source_channel_id: String,
    /// The *source* server this channel belongs to.
    #[serde(rename = "serverId")]
    pub source_server_id: String,
    pub name: String,
    /// The mirror-side channel id, absent or `PENDING_MIRROR_ID` until
    /// creation completes. Skipped when absent so the partial unique index
    /// on `discordId` never sees a null.
    #[serde(rename = "discordId", default, skip_serializing_if = "Option::is_none")]
    pub mirror_channel_id: Option<String>,
    pub kind: ChannelKind,
    /// Source-side parent (category or forum) when there is one.
    #[serde(default)]
    pub parent_source_id: Option<String>,
    /// Whether this channel is an active replication target.
    #[serde(default)]
    pub scraped: bool,
    #[serde(default)]
    pub blacklisted: bool,
    #[serde(default)]
    pub blacklisted_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_attempts: u32,
    /// Set when an operator removed the mirror channel on purpose; such rows
    /// are never auto-repaired.
    #[serde(default)]
    pub manually_deleted: bool,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

impl ChannelMapping {
    pub fn new(
        source_channel_id: impl Into<String>,
        source_server_id: impl Into<String>,
        name: impl Into<String>,
        kind: ChannelKind,
    ) -> Self {
        Self {
            source_channel_id: source_channel_id.into(),
            source_server_id: source_server_id.into(),
            name: name.into(),
            mirror_channel_id: None,
            kind,
            parent_source_id: None,
            scraped: false,
            blacklisted: false,
            blacklisted_until: None,
            failed_attempts: 0,
            manually_deleted: false,
            last_activity: None,
        }
    }

    /// Returns the mirror id only when it refers to a real mirror object,
    /// filtering out the pending sentinel.
    pub fn live_mirror_id(&self) -> Option<&str> {
        match self.mirror_channel_id.as_deref() {
            Some(PENDING_MIRROR_ID) | None => None,
            Some(id) => Some(id),
        }
    }

    /// A blacklist entry expires once its time boundary has passed.
    pub fn is_blacklisted_at(&self, now: DateTime<Utc>) -> bool {
        if !self.blacklisted {
            return false;
        }
        match self.blacklisted_until {
            Some(until) => now < until,
            None => true,
        }
    }
}

/// A processed-message index row. Presence of a record means the source
/// message has been committed to the mirror exactly once; the stored
/// endpoint credentials make later edits possible. Rows expire 15 days
/// after `processedAt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMessage {
    /// The source message id; the collection's unique key.
    #[serde(rename = "discordId")]
    pub source_message_id: String,
    pub source_channel_id: String,
    pub mirror_message_id: String,
    pub mirror_channel_id: String,
    pub mirror_server_id: String,
    pub impersonation_endpoint_id: String,
    pub impersonation_endpoint_secret: String,
    /// True while the committed mirror message is still subject to an edit
    /// once the source-side embed resolves.
    #[serde(default)]
    pub awaiting_embed: bool,
    pub rendered_content: String,
    pub processed_at: DateTime<Utc>,
}

// src/core/store/mod.rs

//! The persistent store contract.
//!
//! The engine treats the document store as an external collaborator: every
//! component talks to this trait, never to a driver. Two backends ship:
//! [`mongo::MongoStore`] for production and [`memory::MemoryStore`] for
//! tests and dry runs.

pub mod memory;
pub mod mongo;

use crate::core::errors::MirrorError;
use crate::core::model::channel::ProcessedMessage;
use crate::core::model::{
    ChannelMapping, LogEntry, MemberCount, MemberDetail, MentionBlacklist, RoleMapping,
    RoleMentionRecord, ServerConfig,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub type StoreResult<T> = Result<T, MirrorError>;

/// Retention windows for the ephemeral collections.
pub const PROCESSED_TTL_DAYS: i64 = 15;
pub const LOGS_TTL_DAYS: i64 = 15;
pub const MEMBERS_TTL_DAYS: i64 = 90;
pub const ROLE_MENTIONS_TTL_DAYS: i64 = 30;

/// Row counts removed by the emergency purge, per collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    pub processed_messages: u64,
    pub logs: u64,
    pub member_details: u64,
    pub member_counts: u64,
    pub role_mentions: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.processed_messages
            + self.logs
            + self.member_details
            + self.member_counts
            + self.role_mentions
    }
}

/// The document-store contract. All operations are keyed the way the
/// collection indices are: channels and roles by `(sourceId, serverId)`,
/// processed messages by source message id, members by `(guildId, userId)`.
#[async_trait]
pub trait Store: Send + Sync {
    // --- Channels ---

    async fn find_channel(
        &self,
        source_channel_id: &str,
        source_server_id: &str,
    ) -> StoreResult<Option<ChannelMapping>>;

    async fn find_channel_by_mirror(
        &self,
        mirror_channel_id: &str,
    ) -> StoreResult<Option<ChannelMapping>>;

    async fn list_channels(&self, source_server_id: &str) -> StoreResult<Vec<ChannelMapping>>;

    /// Channels flagged as active replication targets.
    async fn list_scraped_channels(
        &self,
        source_server_id: &str,
    ) -> StoreResult<Vec<ChannelMapping>>;

    /// Idempotent upsert keyed by `(sourceChannelId, serverId)`. A conflict
    /// on the unique mirror-side id rewrites the conflicting document
    /// instead of failing.
    async fn upsert_channel(&self, mapping: &ChannelMapping) -> StoreResult<()>;

    async fn delete_channel(
        &self,
        source_channel_id: &str,
        source_server_id: &str,
    ) -> StoreResult<()>;

    // --- Roles ---

    async fn find_role(
        &self,
        source_role_id: &str,
        source_server_id: &str,
    ) -> StoreResult<Option<RoleMapping>>;

    async fn list_roles(&self, source_server_id: &str) -> StoreResult<Vec<RoleMapping>>;

    async fn upsert_role(&self, mapping: &RoleMapping) -> StoreResult<()>;

    // --- Processed messages ---

    async fn find_processed(
        &self,
        source_message_id: &str,
    ) -> StoreResult<Option<ProcessedMessage>>;

    /// Inserts a record; returns `false` when a record for the same source
    /// message already exists (duplicate-key errors are swallowed, the
    /// unique index is what enforces exactly-once commitment).
    async fn insert_processed(&self, record: &ProcessedMessage) -> StoreResult<bool>;

    async fn update_processed(&self, record: &ProcessedMessage) -> StoreResult<()>;

    /// Which of the given source message ids already have records; used by
    /// the backfill to dedupe.
    async fn filter_processed(
        &self,
        source_message_ids: &[String],
    ) -> StoreResult<HashSet<String>>;

    async fn count_processed(&self) -> StoreResult<u64>;

    // --- Members ---

    async fn find_member(
        &self,
        source_server_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<MemberDetail>>;

    async fn upsert_member(&self, member: &MemberDetail) -> StoreResult<()>;

    /// Bulk upsert with `upsert=true, ordered=false` semantics; returns the
    /// number of documents written.
    async fn bulk_upsert_members(&self, members: &[MemberDetail]) -> StoreResult<u64>;

    /// How many source servers a user currently has a membership row on.
    async fn count_member_presences(&self, user_id: &str) -> StoreResult<u64>;

    async fn record_member_count(&self, count: &MemberCount) -> StoreResult<()>;

    // --- Logs and mention notifications ---

    async fn append_log(&self, entry: &LogEntry) -> StoreResult<()>;

    async fn append_role_mention(&self, record: &RoleMentionRecord) -> StoreResult<()>;

    async fn is_mention_blacklisted(
        &self,
        source_server_id: &str,
        channel_name: &str,
    ) -> StoreResult<bool>;

    async fn add_mention_blacklist(&self, entry: &MentionBlacklist) -> StoreResult<()>;

    // --- Server config ---

    async fn get_server_config(&self, mirror_server_id: &str) -> StoreResult<Option<ServerConfig>>;

    async fn set_server_config(&self, config: &ServerConfig) -> StoreResult<()>;

    // --- Retention ---

    /// Removes every row from `Logs`. Used by the purge-logs script.
    async fn purge_logs(&self) -> StoreResult<u64>;

    /// Removes all rows from the ephemeral collections while preserving
    /// ServerConfig, Channels, Roles and MentionBlacklists.
    async fn emergency_purge(&self) -> StoreResult<PurgeReport>;

    /// Drops rows past their retention window. A no-op for backends with
    /// server-side TTL indices; the memory backend relies on this sweep.
    async fn expire_ephemeral(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Shared handle used across the engine.
pub type SharedStore = Arc<dyn Store>;

pub(crate) fn processed_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::days(PROCESSED_TTL_DAYS)
}

pub(crate) fn logs_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::days(LOGS_TTL_DAYS)
}

pub(crate) fn members_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::days(MEMBERS_TTL_DAYS)
}

pub(crate) fn role_mentions_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::days(ROLE_MENTIONS_TTL_DAYS)
}

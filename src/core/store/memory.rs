// src/core/store/memory.rs

//! A `DashMap`-backed store for tests and dry runs.
//!
//! Uniqueness rules match the production indices; TTL expiry happens in
//! `expire_ephemeral`, driven by the janitor.

use super::{PurgeReport, Store, StoreResult};
use crate::core::model::channel::ProcessedMessage;
use crate::core::model::{
    ChannelMapping, LogEntry, MemberCount, MemberDetail, MentionBlacklist, RoleMapping,
    RoleMentionRecord, ServerConfig,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;

type PairKey = (String, String);

#[derive(Default)]
pub struct MemoryStore {
    channels: DashMap<PairKey, ChannelMapping>,
    roles: DashMap<PairKey, RoleMapping>,
    processed: DashMap<String, ProcessedMessage>,
    members: DashMap<PairKey, MemberDetail>,
    member_counts: Mutex<Vec<MemberCount>>,
    logs: Mutex<Vec<LogEntry>>,
    role_mentions: Mutex<Vec<RoleMentionRecord>>,
    mention_blacklists: DashMap<PairKey, MentionBlacklist>,
    server_configs: DashMap<String, ServerConfig>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(a: &str, b: &str) -> PairKey {
        (a.to_string(), b.to_string())
    }

    /// Test helper: all persisted log entries, oldest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.logs.lock().clone()
    }

    /// Test helper: all persisted role-mention records.
    pub fn role_mention_records(&self) -> Vec<RoleMentionRecord> {
        self.role_mentions.lock().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_channel(
        &self,
        source_channel_id: &str,
        source_server_id: &str,
    ) -> StoreResult<Option<ChannelMapping>> {
        Ok(self
            .channels
            .get(&Self::key(source_channel_id, source_server_id))
            .map(|e| e.clone()))
    }

    async fn find_channel_by_mirror(
        &self,
        mirror_channel_id: &str,
    ) -> StoreResult<Option<ChannelMapping>> {
        Ok(self
            .channels
            .iter()
            .find(|e| e.mirror_channel_id.as_deref() == Some(mirror_channel_id))
            .map(|e| e.clone()))
    }

    async fn list_channels(&self, source_server_id: &str) -> StoreResult<Vec<ChannelMapping>> {
        Ok(self
            .channels
            .iter()
            .filter(|e| e.source_server_id == source_server_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn list_scraped_channels(
        &self,
        source_server_id: &str,
    ) -> StoreResult<Vec<ChannelMapping>> {
        Ok(self
            .channels
            .iter()
            .filter(|e| e.source_server_id == source_server_id && e.scraped)
            .map(|e| e.clone())
            .collect())
    }

    async fn upsert_channel(&self, mapping: &ChannelMapping) -> StoreResult<()> {
        // Resolve a conflict on the unique mirror-side id by rewriting the
        // document that currently holds it.
        if let Some(mirror_id) = mapping.live_mirror_id() {
            let conflicting: Vec<PairKey> = self
                .channels
                .iter()
                .filter(|e| {
                    e.mirror_channel_id.as_deref() == Some(mirror_id)
                        && (e.source_channel_id != mapping.source_channel_id
                            || e.source_server_id != mapping.source_server_id)
                })
                .map(|e| {
                    (
                        e.source_channel_id.clone(),
                        e.source_server_id.clone(),
                    )
                })
                .collect();
            for key in conflicting {
                if let Some(mut entry) = self.channels.get_mut(&key) {
                    entry.mirror_channel_id = None;
                }
            }
        }
        self.channels.insert(
            Self::key(&mapping.source_channel_id, &mapping.source_server_id),
            mapping.clone(),
        );
        Ok(())
    }

    async fn delete_channel(
        &self,
        source_channel_id: &str,
        source_server_id: &str,
    ) -> StoreResult<()> {
        self.channels
            .remove(&Self::key(source_channel_id, source_server_id));
        Ok(())
    }

    async fn find_role(
        &self,
        source_role_id: &str,
        source_server_id: &str,
    ) -> StoreResult<Option<RoleMapping>> {
        Ok(self
            .roles
            .get(&Self::key(source_role_id, source_server_id))
            .map(|e| e.clone()))
    }

    async fn list_roles(&self, source_server_id: &str) -> StoreResult<Vec<RoleMapping>> {
        Ok(self
            .roles
            .iter()
            .filter(|e| e.source_server_id == source_server_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn upsert_role(&self, mapping: &RoleMapping) -> StoreResult<()> {
        self.roles.insert(
            Self::key(&mapping.source_role_id, &mapping.source_server_id),
            mapping.clone(),
        );
        Ok(())
    }

    async fn find_processed(
        &self,
        source_message_id: &str,
    ) -> StoreResult<Option<ProcessedMessage>> {
        Ok(self.processed.get(source_message_id).map(|e| e.clone()))
    }

    async fn insert_processed(&self, record: &ProcessedMessage) -> StoreResult<bool> {
        match self.processed.entry(record.source_message_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn update_processed(&self, record: &ProcessedMessage) -> StoreResult<()> {
        self.processed
            .insert(record.source_message_id.clone(), record.clone());
        Ok(())
    }

    async fn filter_processed(
        &self,
        source_message_ids: &[String],
    ) -> StoreResult<HashSet<String>> {
        Ok(source_message_ids
            .iter()
            .filter(|id| self.processed.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn count_processed(&self) -> StoreResult<u64> {
        Ok(self.processed.len() as u64)
    }

    async fn find_member(
        &self,
        source_server_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<MemberDetail>> {
        Ok(self
            .members
            .get(&Self::key(source_server_id, user_id))
            .map(|e| e.clone()))
    }

    async fn upsert_member(&self, member: &MemberDetail) -> StoreResult<()> {
        self.members.insert(
            Self::key(&member.source_server_id, &member.user_id),
            member.clone(),
        );
        Ok(())
    }

    async fn bulk_upsert_members(&self, members: &[MemberDetail]) -> StoreResult<u64> {
        // Census rows merge into existing documents; history and danger
        // scoring are never clobbered by a bulk observation.
        for member in members {
            match self
                .members
                .get_mut(&Self::key(&member.source_server_id, &member.user_id))
            {
                Some(mut existing) => {
                    existing.username = member.username.clone();
                    existing.last_seen = member.last_seen;
                }
                None => {
                    self.members.insert(
                        Self::key(&member.source_server_id, &member.user_id),
                        member.clone(),
                    );
                }
            }
        }
        Ok(members.len() as u64)
    }

    async fn count_member_presences(&self, user_id: &str) -> StoreResult<u64> {
        Ok(self.members.iter().filter(|e| e.user_id == user_id).count() as u64)
    }

    async fn record_member_count(&self, count: &MemberCount) -> StoreResult<()> {
        self.member_counts.lock().push(count.clone());
        Ok(())
    }

    async fn append_log(&self, entry: &LogEntry) -> StoreResult<()> {
        self.logs.lock().push(entry.clone());
        Ok(())
    }

    async fn append_role_mention(&self, record: &RoleMentionRecord) -> StoreResult<()> {
        self.role_mentions.lock().push(record.clone());
        Ok(())
    }

    async fn is_mention_blacklisted(
        &self,
        source_server_id: &str,
        channel_name: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .mention_blacklists
            .contains_key(&Self::key(source_server_id, channel_name)))
    }

    async fn add_mention_blacklist(&self, entry: &MentionBlacklist) -> StoreResult<()> {
        self.mention_blacklists.insert(
            Self::key(&entry.source_guild_id, &entry.channel_name),
            entry.clone(),
        );
        Ok(())
    }

    async fn get_server_config(&self, mirror_server_id: &str) -> StoreResult<Option<ServerConfig>> {
        Ok(self.server_configs.get(mirror_server_id).map(|e| e.clone()))
    }

    async fn set_server_config(&self, config: &ServerConfig) -> StoreResult<()> {
        self.server_configs
            .insert(config.mirror_server_id.clone(), config.clone());
        Ok(())
    }

    async fn purge_logs(&self) -> StoreResult<u64> {
        let mut logs = self.logs.lock();
        let removed = logs.len() as u64;
        logs.clear();
        Ok(removed)
    }

    async fn emergency_purge(&self) -> StoreResult<PurgeReport> {
        let report = PurgeReport {
            processed_messages: self.processed.len() as u64,
            logs: self.logs.lock().len() as u64,
            member_details: self.members.len() as u64,
            member_counts: self.member_counts.lock().len() as u64,
            role_mentions: self.role_mentions.lock().len() as u64,
        };
        self.processed.clear();
        self.logs.lock().clear();
        self.members.clear();
        self.member_counts.lock().clear();
        self.role_mentions.lock().clear();
        Ok(report)
    }

    async fn expire_ephemeral(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut removed: u64 = 0;

        let processed_cutoff = super::processed_cutoff(now);
        let before = self.processed.len();
        self.processed
            .retain(|_, rec| rec.processed_at >= processed_cutoff);
        removed += (before - self.processed.len()) as u64;

        let logs_cutoff = super::logs_cutoff(now);
        {
            let mut logs = self.logs.lock();
            let before = logs.len();
            logs.retain(|e| e.timestamp >= logs_cutoff);
            removed += (before - logs.len()) as u64;
        }

        let members_cutoff = super::members_cutoff(now);
        let before = self.members.len();
        self.members.retain(|_, m| m.last_seen >= members_cutoff);
        removed += (before - self.members.len()) as u64;

        let mentions_cutoff = super::role_mentions_cutoff(now);
        {
            let mut mentions = self.role_mentions.lock();
            let before = mentions.len();
            mentions.retain(|m| m.timestamp >= mentions_cutoff);
            removed += (before - mentions.len()) as u64;
        }

        Ok(removed)
    }
}

// src/core/store/mongo.rs

//! The MongoDB-backed store.
//!
//! Collection names, uniqueness rules and TTL windows follow the store
//! contract. Documents are written through `bson::to_document`; the fields
//! that drive a TTL index are rewritten to native BSON dates on the way in
//! (and back to RFC 3339 strings on the way out) so server-side expiry
//! works while the models keep their plain `chrono` types.

use super::{PurgeReport, Store, StoreResult};
use crate::core::errors::MirrorError;
use crate::core::model::channel::ProcessedMessage;
use crate::core::model::{
    ChannelMapping, LogEntry, MemberCount, MemberDetail, MentionBlacklist, RoleMapping,
    RoleMentionRecord, ServerConfig,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{IndexOptions, UpdateOneModel, WriteModel};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

const DEFAULT_DATABASE: &str = "specular";

pub struct MongoStore {
    client: Client,
    channels: Collection<Document>,
    roles: Collection<Document>,
    processed: Collection<Document>,
    members: Collection<Document>,
    member_counts: Collection<Document>,
    logs: Collection<Document>,
    role_mentions: Collection<Document>,
    mention_blacklists: Collection<Document>,
    server_configs: Collection<Document>,
}

fn to_doc<T: Serialize>(value: &T) -> StoreResult<Document> {
    mongodb::bson::to_document(value)
        .map_err(|e| MirrorError::StoreError(format!("BSON serialization failed: {e}")))
}

fn from_doc<T: DeserializeOwned>(doc: Document) -> StoreResult<T> {
    mongodb::bson::from_document(doc)
        .map_err(|e| MirrorError::StoreError(format!("BSON deserialization failed: {e}")))
}

/// Replaces a serialized timestamp with a native BSON date so a TTL index
/// can act on it.
fn bson_date_in(mut doc: Document, field: &str, ts: DateTime<Utc>) -> Document {
    doc.insert(
        field,
        Bson::DateTime(mongodb::bson::DateTime::from_millis(ts.timestamp_millis())),
    );
    doc
}

/// Converts a native BSON date back into the RFC 3339 string form the
/// models deserialize from.
fn bson_date_out(doc: &mut Document, field: &str) {
    if let Some(Bson::DateTime(dt)) = doc.get(field).cloned() {
        if let Ok(text) = dt.try_to_rfc3339_string() {
            doc.insert(field, Bson::String(text));
        }
    }
}

impl MongoStore {
    /// Connects and ensures every index the engine depends on. Index
    /// creation is idempotent; a mismatch against a manually altered
    /// collection fails startup, which is the desired fatal invariant.
    pub async fn connect(uri: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));

        let store = Self {
            channels: db.collection("Channels"),
            roles: db.collection("Roles"),
            processed: db.collection("ProcessedMessages"),
            members: db.collection("MemberDetails"),
            member_counts: db.collection("MemberCounts"),
            logs: db.collection("Logs"),
            role_mentions: db.collection("RoleMentions"),
            mention_blacklists: db.collection("MentionBlacklists"),
            server_configs: db.collection("ServerConfig"),
            client,
        };
        store.ensure_indexes(&db).await?;
        info!(database = %db.name(), "connected to the document store");
        Ok(store)
    }

    async fn ensure_indexes(&self, _db: &Database) -> StoreResult<()> {
        let unique = |keys: Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        let ttl = |keys: Document, days: i64| {
            IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs((days * 24 * 60 * 60) as u64))
                        .build(),
                )
                .build()
        };

        self.channels
            .create_index(unique(doc! { "sourceChannelId": 1, "serverId": 1 }))
            .await?;
        // The mirror id is unique only where present; rows awaiting creation
        // simply omit the field.
        self.channels
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "discordId": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .partial_filter_expression(doc! { "discordId": { "$exists": true } })
                            .build(),
                    )
                    .build(),
            )
            .await?;
        self.channels
            .create_index(IndexModel::builder().keys(doc! { "serverId": 1, "scraped": 1 }).build())
            .await?;

        self.roles
            .create_index(unique(doc! { "sourceRoleId": 1, "serverId": 1 }))
            .await?;

        self.processed
            .create_index(unique(doc! { "discordId": 1 }))
            .await?;
        self.processed
            .create_index(ttl(doc! { "processedAt": 1 }, super::PROCESSED_TTL_DAYS))
            .await?;

        self.members
            .create_index(unique(doc! { "guildId": 1, "userId": 1 }))
            .await?;
        self.members
            .create_index(IndexModel::builder().keys(doc! { "userId": 1 }).build())
            .await?;
        self.members
            .create_index(ttl(doc! { "lastSeen": 1 }, super::MEMBERS_TTL_DAYS))
            .await?;

        self.logs
            .create_index(ttl(doc! { "timestamp": 1 }, super::LOGS_TTL_DAYS))
            .await?;

        self.role_mentions
            .create_index(ttl(doc! { "timestamp": 1 }, super::ROLE_MENTIONS_TTL_DAYS))
            .await?;

        self.mention_blacklists
            .create_index(unique(doc! { "sourceGuildId": 1, "channelName": 1 }))
            .await?;

        self.server_configs
            .create_index(unique(doc! { "mirrorServerId": 1 }))
            .await?;

        Ok(())
    }

    fn channel_key(mapping: &ChannelMapping) -> Document {
        doc! {
            "sourceChannelId": &mapping.source_channel_id,
            "serverId": &mapping.source_server_id,
        }
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn find_channel(
        &self,
        source_channel_id: &str,
        source_server_id: &str,
    ) -> StoreResult<Option<ChannelMapping>> {
        let found = self
            .channels
            .find_one(doc! { "sourceChannelId": source_channel_id, "serverId": source_server_id })
            .await?;
        found.map(from_doc).transpose()
    }

    async fn find_channel_by_mirror(
        &self,
        mirror_channel_id: &str,
    ) -> StoreResult<Option<ChannelMapping>> {
        let found = self
            .channels
            .find_one(doc! { "discordId": mirror_channel_id })
            .await?;
        found.map(from_doc).transpose()
    }

    async fn list_channels(&self, source_server_id: &str) -> StoreResult<Vec<ChannelMapping>> {
        let mut cursor = self.channels.find(doc! { "serverId": source_server_id }).await?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            out.push(from_doc(doc)?);
        }
        Ok(out)
    }

    async fn list_scraped_channels(
        &self,
        source_server_id: &str,
    ) -> StoreResult<Vec<ChannelMapping>> {
        let mut cursor = self
            .channels
            .find(doc! { "serverId": source_server_id, "scraped": true })
            .await?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            out.push(from_doc(doc)?);
        }
        Ok(out)
    }

    async fn upsert_channel(&self, mapping: &ChannelMapping) -> StoreResult<()> {
        let replacement = to_doc(mapping)?;
        let attempt = self
            .channels
            .replace_one(Self::channel_key(mapping), replacement.clone())
            .upsert(true)
            .await;

        match attempt {
            Ok(_) => Ok(()),
            Err(e) => {
                let err: MirrorError = e.into();
                if !matches!(err, MirrorError::DuplicateKey(_)) {
                    return Err(err);
                }
                // Another row holds this mirror id. Rewrite that document by
                // releasing its claim, then retry once.
                if let Some(mirror_id) = mapping.live_mirror_id() {
                    self.channels
                        .update_one(
                            doc! { "discordId": mirror_id },
                            doc! { "$unset": { "discordId": "" } },
                        )
                        .await?;
                }
                self.channels
                    .replace_one(Self::channel_key(mapping), replacement)
                    .upsert(true)
                    .await?;
                Ok(())
            }
        }
    }

    async fn delete_channel(
        &self,
        source_channel_id: &str,
        source_server_id: &str,
    ) -> StoreResult<()> {
        self.channels
            .delete_many(
                doc! { "sourceChannelId": source_channel_id, "serverId": source_server_id },
            )
            .await?;
        Ok(())
    }

    async fn find_role(
        &self,
        source_role_id: &str,
        source_server_id: &str,
    ) -> StoreResult<Option<RoleMapping>> {
        let found = self
            .roles
            .find_one(doc! { "sourceRoleId": source_role_id, "serverId": source_server_id })
            .await?;
        found.map(from_doc).transpose()
    }

    async fn list_roles(&self, source_server_id: &str) -> StoreResult<Vec<RoleMapping>> {
        let mut cursor = self.roles.find(doc! { "serverId": source_server_id }).await?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            out.push(from_doc(doc)?);
        }
        Ok(out)
    }

    async fn upsert_role(&self, mapping: &RoleMapping) -> StoreResult<()> {
        self.roles
            .replace_one(
                doc! { "sourceRoleId": &mapping.source_role_id, "serverId": &mapping.source_server_id },
                to_doc(mapping)?,
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn find_processed(
        &self,
        source_message_id: &str,
    ) -> StoreResult<Option<ProcessedMessage>> {
        let found = self
            .processed
            .find_one(doc! { "discordId": source_message_id })
            .await?;
        match found {
            Some(mut doc) => {
                bson_date_out(&mut doc, "processedAt");
                Ok(Some(from_doc(doc)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_processed(&self, record: &ProcessedMessage) -> StoreResult<bool> {
        let doc = bson_date_in(to_doc(record)?, "processedAt", record.processed_at);
        match self.processed.insert_one(doc).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err: MirrorError = e.into();
                // The unique index enforces exactly-once commitment; a
                // duplicate means another task already committed.
                if matches!(err, MirrorError::DuplicateKey(_)) {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn update_processed(&self, record: &ProcessedMessage) -> StoreResult<()> {
        let doc = bson_date_in(to_doc(record)?, "processedAt", record.processed_at);
        self.processed
            .replace_one(doc! { "discordId": &record.source_message_id }, doc)
            .await?;
        Ok(())
    }

    async fn filter_processed(
        &self,
        source_message_ids: &[String],
    ) -> StoreResult<HashSet<String>> {
        if source_message_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut cursor = self
            .processed
            .find(doc! { "discordId": { "$in": source_message_ids } })
            .projection(doc! { "discordId": 1 })
            .await?;
        let mut out = HashSet::new();
        while let Some(doc) = cursor.try_next().await? {
            if let Ok(id) = doc.get_str("discordId") {
                out.insert(id.to_string());
            }
        }
        Ok(out)
    }

    async fn count_processed(&self) -> StoreResult<u64> {
        Ok(self.processed.count_documents(doc! {}).await?)
    }

    async fn find_member(
        &self,
        source_server_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<MemberDetail>> {
        let found = self
            .members
            .find_one(doc! { "guildId": source_server_id, "userId": user_id })
            .await?;
        match found {
            Some(mut doc) => {
                bson_date_out(&mut doc, "lastSeen");
                Ok(Some(from_doc(doc)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_member(&self, member: &MemberDetail) -> StoreResult<()> {
        let doc = bson_date_in(to_doc(member)?, "lastSeen", member.last_seen);
        self.members
            .replace_one(
                doc! { "guildId": &member.source_server_id, "userId": &member.user_id },
                doc,
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn bulk_upsert_members(&self, members: &[MemberDetail]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut models = Vec::with_capacity(members.len());
        for member in members {
            // Merge semantics: a bulk observation refreshes the identity
            // fields but must not clobber history or danger scoring.
            let last_seen = mongodb::bson::DateTime::from_millis(member.last_seen.timestamp_millis());
            models.push(WriteModel::UpdateOne(
                UpdateOneModel::builder()
                    .namespace(self.members.namespace())
                    .filter(doc! { "guildId": &member.source_server_id, "userId": &member.user_id })
                    .update(doc! {
                        "$set": {
                            "username": &member.username,
                            "lastSeen": Bson::DateTime(last_seen),
                        },
                        "$setOnInsert": {
                            "guildId": &member.source_server_id,
                            "userId": &member.user_id,
                            "dangerLevel": 0,
                            "isDangerous": false,
                            "history": [],
                        },
                    })
                    .upsert(true)
                    .build(),
            ));
        }
        let result = self.client.bulk_write(models).ordered(false).await?;
        Ok((result.upserted_count + result.modified_count).max(0) as u64)
    }

    async fn count_member_presences(&self, user_id: &str) -> StoreResult<u64> {
        Ok(self
            .members
            .count_documents(doc! { "userId": user_id })
            .await?)
    }

    async fn record_member_count(&self, count: &MemberCount) -> StoreResult<()> {
        self.member_counts.insert_one(to_doc(count)?).await?;
        Ok(())
    }

    async fn append_log(&self, entry: &LogEntry) -> StoreResult<()> {
        let doc = bson_date_in(to_doc(entry)?, "timestamp", entry.timestamp);
        self.logs.insert_one(doc).await?;
        Ok(())
    }

    async fn append_role_mention(&self, record: &RoleMentionRecord) -> StoreResult<()> {
        let doc = bson_date_in(to_doc(record)?, "timestamp", record.timestamp);
        self.role_mentions.insert_one(doc).await?;
        Ok(())
    }

    async fn is_mention_blacklisted(
        &self,
        source_server_id: &str,
        channel_name: &str,
    ) -> StoreResult<bool> {
        let found = self
            .mention_blacklists
            .find_one(doc! { "sourceGuildId": source_server_id, "channelName": channel_name })
            .await?;
        Ok(found.is_some())
    }

    async fn add_mention_blacklist(&self, entry: &MentionBlacklist) -> StoreResult<()> {
        self.mention_blacklists
            .replace_one(
                doc! { "sourceGuildId": &entry.source_guild_id, "channelName": &entry.channel_name },
                to_doc(entry)?,
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get_server_config(&self, mirror_server_id: &str) -> StoreResult<Option<ServerConfig>> {
        let found = self
            .server_configs
            .find_one(doc! { "mirrorServerId": mirror_server_id })
            .await?;
        found.map(from_doc).transpose()
    }

    async fn set_server_config(&self, config: &ServerConfig) -> StoreResult<()> {
        self.server_configs
            .replace_one(doc! { "mirrorServerId": &config.mirror_server_id }, to_doc(config)?)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn purge_logs(&self) -> StoreResult<u64> {
        let result = self.logs.delete_many(doc! {}).await?;
        Ok(result.deleted_count)
    }

    async fn emergency_purge(&self) -> StoreResult<PurgeReport> {
        let report = PurgeReport {
            processed_messages: self.processed.delete_many(doc! {}).await?.deleted_count,
            logs: self.logs.delete_many(doc! {}).await?.deleted_count,
            member_details: self.members.delete_many(doc! {}).await?.deleted_count,
            member_counts: self.member_counts.delete_many(doc! {}).await?.deleted_count,
            role_mentions: self.role_mentions.delete_many(doc! {}).await?.deleted_count,
        };
        Ok(report)
    }

    async fn expire_ephemeral(&self, _now: DateTime<Utc>) -> StoreResult<u64> {
        // Server-side TTL indices already expire these collections.
        Ok(0)
    }
}

// src/core/transport/mod.rs

//! Abstract clients for the chat provider.
//!
//! The engine sees two transports: the *control* client (bot credentials,
//! full admin on the mirror) and the *observation* client (a regular user
//! session on the source). Both are opaque traits here; `http` carries the
//! REST implementations and `gateway` the polling event source.

pub mod gateway;
pub mod http;
pub mod payload;
pub mod webhook;

use crate::core::errors::MirrorError;
use crate::core::events::{SourceChannel, SourceMember, SourceRole};
use crate::core::model::message::{Embed, SourceMessage};
use crate::core::model::ChannelKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use payload::{AllowedMentions, OutboundFile, OutboundPayload};
pub use webhook::{EndpointFactory, EndpointHandle, EndpointRegistry, ImpersonationEndpoint, SentMessage};

pub type TransportResult<T> = Result<T, MirrorError>;

/// Outcome of probing one source channel with the user session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAccess {
    Accessible,
    /// The source returned 403.
    Denied,
    /// The source returned 404.
    Missing,
}

/// Request to create a channel on the mirror.
#[derive(Debug, Clone, Serialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub kind: ChannelKind,
    /// Mirror-side parent category id, when parenting applies.
    pub parent_mirror_id: Option<String>,
    pub topic: Option<String>,
}

/// A channel that exists on the mirror.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorChannel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub parent_id: Option<String>,
}

/// A role that exists on the mirror.
#[derive(Debug, Clone)]
pub struct MirrorRole {
    pub id: String,
    pub name: String,
    /// Raw permission bitmap.
    pub permissions: u64,
}

/// Request to create or update a mirror role.
#[derive(Debug, Clone)]
pub struct CreateRoleRequest {
    pub name: String,
    pub permissions: u64,
    pub mentionable: bool,
}

/// A custom emoji on the mirror.
#[derive(Debug, Clone)]
pub struct MirrorEmoji {
    pub id: String,
    pub name: String,
}

/// Options for opening a forum post on the mirror. The provider requires
/// an archive duration and an explicit (possibly empty) tag list.
#[derive(Debug, Clone)]
pub struct ForumPostRequest {
    pub title: String,
    pub initial_content: String,
    pub auto_archive_minutes: u32,
    pub available_tags: Vec<String>,
}

/// The bot-credential transport: creates and edits mirror objects.
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn fetch_channels(&self, mirror_server_id: &str) -> TransportResult<Vec<MirrorChannel>>;

    async fn fetch_roles(&self, mirror_server_id: &str) -> TransportResult<Vec<MirrorRole>>;

    async fn create_channel(
        &self,
        mirror_server_id: &str,
        request: CreateChannelRequest,
    ) -> TransportResult<MirrorChannel>;

    async fn create_role(
        &self,
        mirror_server_id: &str,
        request: CreateRoleRequest,
    ) -> TransportResult<MirrorRole>;

    async fn update_role(
        &self,
        mirror_server_id: &str,
        mirror_role_id: &str,
        request: CreateRoleRequest,
    ) -> TransportResult<()>;

    /// Creates the per-channel impersonation endpoint.
    async fn create_webhook(
        &self,
        mirror_channel_id: &str,
        name: &str,
    ) -> TransportResult<EndpointHandle>;

    async fn create_forum_post(
        &self,
        mirror_forum_id: &str,
        request: ForumPostRequest,
    ) -> TransportResult<MirrorChannel>;

    /// Starts a thread from an existing mirror message.
    async fn start_thread_from_message(
        &self,
        mirror_channel_id: &str,
        mirror_message_id: &str,
        name: &str,
    ) -> TransportResult<MirrorChannel>;

    /// Starts a standalone thread under a mirror text channel.
    async fn start_thread(
        &self,
        mirror_channel_id: &str,
        name: &str,
    ) -> TransportResult<MirrorChannel>;

    /// Cheap existence probe for a mirror channel id.
    async fn channel_exists(&self, mirror_channel_id: &str) -> TransportResult<bool>;

    async fn add_reaction(
        &self,
        mirror_channel_id: &str,
        mirror_message_id: &str,
        emoji: &str,
    ) -> TransportResult<()>;

    /// The custom emoji available on the mirror; reactions whose emoji do
    /// not exist there (by name) are skipped.
    async fn fetch_emojis(&self, mirror_server_id: &str) -> TransportResult<Vec<MirrorEmoji>>;

    /// Posts a plain bot message (log channels, alerts).
    async fn post_message(
        &self,
        mirror_channel_id: &str,
        content: Option<String>,
        embed: Option<Embed>,
    ) -> TransportResult<String>;
}

/// The user-session transport: read-only observation of the source.
#[async_trait]
pub trait ObservationClient: Send + Sync {
    async fn fetch_guild_channels(
        &self,
        source_server_id: &str,
    ) -> TransportResult<Vec<SourceChannel>>;

    async fn fetch_guild_roles(&self, source_server_id: &str) -> TransportResult<Vec<SourceRole>>;

    async fn fetch_guild_member_count(&self, source_server_id: &str) -> TransportResult<u64>;

    /// Paged member listing; `query` narrows by name prefix when the
    /// transport supports search.
    async fn fetch_guild_members(
        &self,
        source_server_id: &str,
        limit: u32,
        query: Option<&str>,
    ) -> TransportResult<Vec<SourceMember>>;

    /// The bulk member fetch (gateway member-chunk analogue).
    async fn request_all_members(
        &self,
        source_server_id: &str,
    ) -> TransportResult<Vec<SourceMember>>;

    async fn fetch_thread_by_id(&self, thread_id: &str)
        -> TransportResult<Option<SourceChannel>>;

    async fn fetch_channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<&str>,
        after: Option<&str>,
    ) -> TransportResult<Vec<SourceMessage>>;

    /// GETs a single message from the channel to classify access; 403 and
    /// 404 map onto the [`ChannelAccess`] variants.
    async fn test_channel_access(&self, channel_id: &str) -> TransportResult<ChannelAccess>;
}

// src/core/events.rs

//! The tagged union of source-side events consumed by the pipeline, and the
//! `EventSource` trait produced by gateway/polling transports.

use crate::core::model::message::{Embed, Reaction, SourceMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A partial message as carried by an update event. Only the fields the
/// source actually changed are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMessageUpdate {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

/// A lightweight view of a source channel as reported by topology fetches
/// and channel/thread creation events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceChannel {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub kind: crate::core::model::ChannelKind,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// A source role as reported by topology fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRole {
    pub id: String,
    pub server_id: String,
    pub name: String,
    /// Raw permission bitmap as a decimal string, the provider's format.
    pub permissions: String,
    #[serde(default)]
    pub is_everyone: bool,
}

/// A member observed by the census detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMember {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub is_bot: bool,
}

/// Everything the engine can observe happening on the source server.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    MessageCreated(SourceMessage),
    MessageUpdated(SourceMessageUpdate),
    MessageDeleted {
        channel_id: String,
        message_id: String,
    },
    ReactionAdded {
        channel_id: String,
        message_id: String,
        reaction: Reaction,
    },
    ThreadCreated(SourceChannel),
    ChannelCreated(SourceChannel),
    RoleCreated(SourceRole),
}

impl SourceEvent {
    /// The source channel an event belongs to, used to route it onto the
    /// per-channel worker that preserves intra-channel ordering. Topology
    /// events carry their own channel id.
    pub fn channel_id(&self) -> &str {
        match self {
            SourceEvent::MessageCreated(m) => &m.channel_id,
            SourceEvent::MessageUpdated(u) => &u.channel_id,
            SourceEvent::MessageDeleted { channel_id, .. } => channel_id,
            SourceEvent::ReactionAdded { channel_id, .. } => channel_id,
            SourceEvent::ThreadCreated(c) => &c.id,
            SourceEvent::ChannelCreated(c) => &c.id,
            SourceEvent::RoleCreated(r) => &r.id,
        }
    }
}

/// An upstream event feed for one source server. The shipped implementation
/// polls through the user transport; a live gateway session plugs in behind
/// the same trait.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for the next event. `None` means the feed has terminated and
    /// the consumer should shut down.
    async fn recv(&mut self) -> Option<SourceEvent>;
}

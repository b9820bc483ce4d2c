// src/core/model/message.rs

//! Wire payload types for source messages, embeds and attachments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard provider limit on embed count per message.
pub const MAX_EMBEDS_PER_MESSAGE: usize = 10;

/// Hard provider limit on the summed character weight of one embed.
pub const MAX_EMBED_CHARS: usize = 6000;

/// The author of a source message, as observed through the user transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    /// True for application-type accounts (slash-command responders).
    #[serde(default)]
    pub is_app: bool,
}

/// One embed field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedFooter {
    pub text: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

/// A message embed. Title, description, fields, author, footer and images
/// are propagated to the mirror after mention rewriting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<u32>,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    #[serde(default)]
    pub author: Option<EmbedAuthor>,
    #[serde(default)]
    pub footer: Option<EmbedFooter>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl Embed {
    /// The provider weighs an embed by the summed character count of its
    /// textual parts.
    pub fn char_weight(&self) -> usize {
        let mut total = 0;
        if let Some(t) = &self.title {
            total += t.chars().count();
        }
        if let Some(d) = &self.description {
            total += d.chars().count();
        }
        for f in &self.fields {
            total += f.name.chars().count() + f.value.chars().count();
        }
        if let Some(a) = &self.author {
            total += a.name.chars().count();
        }
        if let Some(f) = &self.footer {
            total += f.text.chars().count();
        }
        total
    }

    /// An embed with no textual parts and no image cannot be rendered.
    pub fn is_empty(&self) -> bool {
        self.char_weight() == 0 && self.image_url.is_none() && self.thumbnail_url.is_none()
    }

    pub fn is_valid(&self) -> bool {
        !self.is_empty() && self.char_weight() <= MAX_EMBED_CHARS
    }
}

/// A reference to a source attachment, prior to download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    /// Size in bytes as reported by the source; the download path verifies.
    #[serde(default)]
    pub size: u64,
}

/// One reaction observed on a source message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    /// Unicode emoji, or the name of a custom emoji.
    pub emoji: String,
    /// Set for custom emoji; unicode emoji carry no id.
    #[serde(default)]
    pub emoji_id: Option<String>,
}

/// A source message as delivered by the event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMessage {
    pub id: String,
    pub channel_id: String,
    pub author: SourceAuthor,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Present on responses tied directly to a command invocation.
    #[serde(default)]
    pub interaction_id: Option<String>,
    /// Set when this message started a thread on the source.
    #[serde(default)]
    pub started_thread: Option<StartedThread>,
}

/// Metadata of a thread opened from a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedThread {
    pub thread_id: String,
    pub name: String,
}

impl SourceMessage {
    /// A plain user message carries no embeds and no files; these are the
    /// candidates for the late-embed buffer.
    pub fn is_plain(&self) -> bool {
        self.embeds.is_empty() && self.attachments.is_empty()
    }

    /// True when the content carries a link the provider may later resolve
    /// into an embed.
    pub fn has_link(&self) -> bool {
        self.content.contains("http://") || self.content.contains("https://")
    }
}

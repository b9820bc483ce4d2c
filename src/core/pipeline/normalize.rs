// src/core/pipeline/normalize.rs

//! Pure payload normalization: cross-server reference rewriting.
//!
//! The rewriter is a pure function of the raw text and a mappings
//! snapshot. User mentions become bolded plain names and can never ping;
//! channel mentions become mirror references when mapped, bolded
//! placeholders (queued for deferred creation) otherwise; role mentions
//! stay live when mapped so notifications fire; deep links into the
//! source server are re-pointed at the mirror when their target is known.

use crate::core::model::message::Embed;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static CHANNEL_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<#(\d{17,20})>").expect("static regex"));
static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?(\d{17,20})>").expect("static regex"));
static ROLE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@&(\d{17,20})>").expect("static regex"));
static DEEP_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:\w+\.)?discord(?:app)?\.com/channels/(\d{17,20})/(\d{17,20})(/(\d{17,20}))?")
        .expect("static regex")
});
static EVERYONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(everyone|here)").expect("static regex"));

/// What a source channel id translates to.
#[derive(Debug, Clone)]
pub struct ChannelRef {
    pub mirror_id: Option<String>,
    pub name: String,
}

/// What a source role id translates to.
#[derive(Debug, Clone)]
pub struct RoleRef {
    pub mirror_id: Option<String>,
    pub name: String,
}

/// Mirror location of an already-replicated message, for deep links.
#[derive(Debug, Clone)]
pub struct MessageLink {
    pub mirror_channel_id: String,
    pub mirror_message_id: String,
}

/// An immutable view of the correspondence state, assembled by the caller
/// before rewriting. The rewriter itself never touches the store.
#[derive(Debug, Clone, Default)]
pub struct MappingSnapshot {
    pub source_server_id: String,
    pub mirror_server_id: String,
    pub channels: HashMap<String, ChannelRef>,
    pub roles: HashMap<String, RoleRef>,
    /// Display names of referenced users.
    pub users: HashMap<String, String>,
    pub message_links: HashMap<String, MessageLink>,
}

/// A channel reference left as a placeholder, queued for deferred
/// creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChannelRef {
    pub source_channel_id: String,
    pub name: String,
}

/// The rewriter's output for one piece of text.
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub text: String,
    pub pending_channels: Vec<PendingChannelRef>,
    /// Mirror role ids that remained live mentions.
    pub live_role_ids: Vec<String>,
    /// Role names mentioned (mapped or not), for the notification log.
    pub mentioned_roles: Vec<String>,
    /// User names mentioned, for the notification log.
    pub mentioned_users: Vec<String>,
}

/// The placeholder rendered for a channel that has no mirror yet. Deferred
/// creation later swaps it for a live reference.
pub fn channel_placeholder(name: &str) -> String {
    format!("**#{name}**")
}

/// Rewrites one piece of text against the snapshot.
pub fn rewrite(raw: &str, snapshot: &MappingSnapshot) -> Rendered {
    let mut rendered = Rendered::default();

    // Deep links first; their digits must not be confused with mention
    // syntax later.
    let text = DEEP_LINK.replace_all(raw, |caps: &Captures| {
        let guild = &caps[1];
        let channel = &caps[2];
        let message = caps.get(4).map(|m| m.as_str());
        if guild != snapshot.source_server_id {
            return caps[0].to_string();
        }
        if let Some(message_id) = message {
            if let Some(link) = snapshot.message_links.get(message_id) {
                return format!(
                    "https://discord.com/channels/{}/{}/{}",
                    snapshot.mirror_server_id, link.mirror_channel_id, link.mirror_message_id
                );
            }
        }
        match snapshot.channels.get(channel).and_then(|c| c.mirror_id.as_ref()) {
            Some(mirror_channel) => format!(
                "https://discord.com/channels/{}/{}",
                snapshot.mirror_server_id, mirror_channel
            ),
            None => caps[0].to_string(),
        }
    });

    let text = CHANNEL_MENTION.replace_all(&text, |caps: &Captures| {
        let source_id = &caps[1];
        match snapshot.channels.get(source_id) {
            Some(channel) => match &channel.mirror_id {
                Some(mirror_id) => format!("<#{mirror_id}>"),
                None => {
                    rendered.pending_channels.push(PendingChannelRef {
                        source_channel_id: source_id.to_string(),
                        name: channel.name.clone(),
                    });
                    channel_placeholder(&channel.name)
                }
            },
            None => {
                rendered.pending_channels.push(PendingChannelRef {
                    source_channel_id: source_id.to_string(),
                    name: source_id.to_string(),
                });
                channel_placeholder(source_id)
            }
        }
    });

    let text = USER_MENTION.replace_all(&text, |caps: &Captures| {
        let name = snapshot
            .users
            .get(&caps[1])
            .cloned()
            .unwrap_or_else(|| "member".to_string());
        rendered.mentioned_users.push(name.clone());
        format!("**@{name}**")
    });

    let text = ROLE_MENTION.replace_all(&text, |caps: &Captures| {
        match snapshot.roles.get(&caps[1]) {
            Some(role) => {
                rendered.mentioned_roles.push(role.name.clone());
                match &role.mirror_id {
                    Some(mirror_id) => {
                        rendered.live_role_ids.push(mirror_id.clone());
                        format!("<@&{mirror_id}>")
                    }
                    None => format!("**@{}**", role.name),
                }
            }
            None => "**@role**".to_string(),
        }
    });

    // Mass mentions are neutralized in text as well as being excluded from
    // allowed-mentions.
    let text = EVERYONE.replace_all(&text, "@\u{200B}$1");

    rendered.text = text.into_owned();
    rendered
}

/// Rewrites an embed's textual parts in place. Embed text never queues
/// deferred channel creation; placeholders stay placeholders.
pub fn rewrite_embed(embed: &Embed, snapshot: &MappingSnapshot) -> Embed {
    let mut out = embed.clone();
    if let Some(title) = &embed.title {
        out.title = Some(rewrite(title, snapshot).text);
    }
    if let Some(description) = &embed.description {
        out.description = Some(rewrite(description, snapshot).text);
    }
    for (field, original) in out.fields.iter_mut().zip(embed.fields.iter()) {
        field.name = rewrite(&original.name, snapshot).text;
        field.value = rewrite(&original.value, snapshot).text;
    }
    out
}

/// All provider-id references found in a set of texts; the pipeline uses
/// this to assemble the snapshot with one store round-trip per id class.
#[derive(Debug, Default, Clone)]
pub struct RefScan {
    pub channel_ids: Vec<String>,
    pub user_ids: Vec<String>,
    pub role_ids: Vec<String>,
    pub message_ids: Vec<String>,
}

pub fn scan_refs<'a>(texts: impl IntoIterator<Item = &'a str>) -> RefScan {
    let mut scan = RefScan::default();
    for text in texts {
        for caps in CHANNEL_MENTION.captures_iter(text) {
            push_unique(&mut scan.channel_ids, &caps[1]);
        }
        for caps in USER_MENTION.captures_iter(text) {
            push_unique(&mut scan.user_ids, &caps[1]);
        }
        for caps in ROLE_MENTION.captures_iter(text) {
            push_unique(&mut scan.role_ids, &caps[1]);
        }
        for caps in DEEP_LINK.captures_iter(text) {
            push_unique(&mut scan.channel_ids, &caps[2]);
            if let Some(message) = caps.get(4) {
                push_unique(&mut scan.message_ids, message.as_str());
            }
        }
    }
    scan
}

fn push_unique(list: &mut Vec<String>, id: &str) {
    if !list.iter().any(|existing| existing == id) {
        list.push(id.to_string());
    }
}

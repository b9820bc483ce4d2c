// src/core/notify.rs

//! Operator-facing notifications: rich embeds in the mirror's log channels
//! plus persisted `Logs` rows.
//!
//! Notification failures are swallowed with a warning; diagnostics must
//! never take a replication loop down with them. The one escalation is a
//! store quota failure, which turns into a critical `@everyone` alert with
//! the retention scripts as the advertised remedy.

use crate::core::errors::MirrorError;
use crate::core::model::message::{Embed, EmbedFooter};
use crate::core::model::{LogEntry, LogKind};
use crate::core::store::SharedStore;
use crate::core::transport::ControlClient;
use crate::config::PairConfig;
use std::sync::Arc;
use tracing::warn;

pub const COLOR_RED: u32 = 0xED4245;
pub const COLOR_ORANGE: u32 = 0xE67E22;
pub const COLOR_GREEN: u32 = 0x57F287;
pub const COLOR_BLUE: u32 = 0x3498DB;

/// Which mirror-side log channel a notification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChannel {
    Error,
    Newroom,
    Admin,
    Mention,
}

pub struct Notifier {
    control: Arc<dyn ControlClient>,
    store: SharedStore,
    pair: PairConfig,
}

impl Notifier {
    pub fn new(control: Arc<dyn ControlClient>, store: SharedStore, pair: PairConfig) -> Self {
        Self {
            control,
            store,
            pair,
        }
    }

    fn channel_id(&self, channel: LogChannel) -> Option<&str> {
        match channel {
            LogChannel::Error => self.pair.error_channel_id.as_deref(),
            LogChannel::Newroom => self.pair.newroom_channel_id.as_deref(),
            LogChannel::Admin => self.pair.admin_channel_id.as_deref(),
            LogChannel::Mention => self.pair.mention_channel_id.as_deref(),
        }
    }

    /// Posts an embed to a log channel. `mention_everyone` is reserved for
    /// critical alerts and never set on night-time activity notices.
    pub async fn post_embed(&self, channel: LogChannel, embed: Embed, mention_everyone: bool) {
        let Some(channel_id) = self.channel_id(channel) else {
            return;
        };
        let content = mention_everyone.then(|| "@everyone".to_string());
        if let Err(e) = self
            .control
            .post_message(channel_id, content, Some(embed))
            .await
        {
            warn!(error = %e, ?channel, "failed to post log embed");
        }
    }

    /// Persists a log row, escalating a quota failure to a critical alert.
    pub async fn persist(&self, entry: LogEntry) {
        match self.store.append_log(&entry).await {
            Ok(()) => {}
            Err(MirrorError::QuotaExceeded(detail)) => {
                self.post_embed(
                    LogChannel::Error,
                    Embed {
                        title: Some("Store quota exceeded".to_string()),
                        description: Some(format!(
                            "The document store refused a write: {detail}\n\
                             Free space with `/autoclean` or `/purge-logs`."
                        )),
                        color: Some(COLOR_RED),
                        ..Default::default()
                    },
                    true,
                )
                .await;
            }
            Err(e) => warn!(error = %e, "failed to persist log entry"),
        }
    }

    /// Error diagnostics with an optional remediation hint.
    pub async fn error(&self, title: &str, description: &str, remediation: Option<&str>) {
        let mut body = description.to_string();
        if let Some(hint) = remediation {
            body.push_str("\n\n");
            body.push_str(hint);
        }
        self.post_embed(
            LogChannel::Error,
            Embed {
                title: Some(title.to_string()),
                description: Some(body.clone()),
                color: Some(COLOR_RED),
                ..Default::default()
            },
            false,
        )
        .await;
        self.persist(
            LogEntry::new(LogKind::Error, &self.pair.mirror_server_id, title).with_details(body),
        )
        .await;
    }

    /// Success notification for a newly created mirror channel.
    pub async fn newroom(&self, channel_name: &str, mirror_channel_id: &str) {
        self.post_embed(
            LogChannel::Newroom,
            Embed {
                title: Some("New channel mirrored".to_string()),
                description: Some(format!("`#{channel_name}` is now live as <#{mirror_channel_id}>.")),
                color: Some(COLOR_GREEN),
                ..Default::default()
            },
            false,
        )
        .await;
        self.persist(
            LogEntry::new(
                LogKind::Newroom,
                &self.pair.mirror_server_id,
                format!("created #{channel_name}"),
            )
            .with_details(mirror_channel_id.to_string()),
        )
        .await;
    }

    /// Privileged state changes: auto-blacklist, auto-recovery, cap events.
    pub async fn admin(&self, message: &str) {
        self.post_embed(
            LogChannel::Admin,
            Embed {
                description: Some(message.to_string()),
                color: Some(COLOR_BLUE),
                ..Default::default()
            },
            false,
        )
        .await;
        self.persist(LogEntry::new(
            LogKind::Admin,
            &self.pair.mirror_server_id,
            message,
        ))
        .await;
    }

    /// A down/recovered notice from the activity monitor. The footer
    /// carries the follow-up schedule.
    pub async fn activity(
        &self,
        title: &str,
        description: &str,
        color: u32,
        footer: Option<&str>,
        mention_everyone: bool,
    ) {
        self.post_embed(
            LogChannel::Error,
            Embed {
                title: Some(title.to_string()),
                description: Some(description.to_string()),
                color: Some(color),
                footer: footer.map(|text| EmbedFooter {
                    text: text.to_string(),
                    icon_url: None,
                }),
                ..Default::default()
            },
            mention_everyone,
        )
        .await;
    }

    /// A replicated mention notification.
    pub async fn mention(&self, description: &str) {
        self.post_embed(
            LogChannel::Mention,
            Embed {
                description: Some(description.to_string()),
                color: Some(COLOR_BLUE),
                ..Default::default()
            },
            false,
        )
        .await;
    }
}

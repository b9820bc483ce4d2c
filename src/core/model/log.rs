// src/core/model/log.rs

//! Persistent diagnostic log entries (15-day TTL) and role-mention records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// The tagged kinds of persistent log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LogKind {
    /// A mirror channel was created.
    Newroom,
    /// An operational failure with remediation hints.
    Error,
    /// Role sync activity.
    Roles,
    /// Privileged state changes (auto-blacklist, auto-recovery).
    Admin,
    /// Automatic engine start/replication notices.
    AutoStart,
    /// Membership census results.
    Members,
}

/// One persisted log entry; rows expire 15 days after `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub kind: LogKind,
    pub mirror_server_id: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(kind: LogKind, mirror_server_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            mirror_server_id: mirror_server_id.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// A replicated role-mention notification; rows expire after 30 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMentionRecord {
    pub source_server_id: String,
    pub source_channel_id: String,
    pub channel_name: String,
    pub role_name: String,
    pub source_message_id: String,
    pub timestamp: DateTime<Utc>,
}

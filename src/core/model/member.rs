// src/core/model/member.rs

//! Membership census records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence history is bounded so a chatty member cannot grow a document
/// without limit.
pub const MAX_HISTORY_ENTRIES: usize = 100;

/// One presence observation appended to a member's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub timestamp: DateTime<Utc>,
    /// Which detection method observed the member ("message", "lazy-list",
    /// "chunk", "search", "cache").
    pub method: String,
}

/// One `(guildId, userId)` membership row; expires 90 days after `lastSeen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDetail {
    #[serde(rename = "guildId")]
    pub source_server_id: String,
    pub user_id: String,
    pub username: String,
    /// 0–3, derived from the number of concurrent source servers the user
    /// is present on.
    #[serde(default)]
    pub danger_level: u8,
    #[serde(default)]
    pub is_dangerous: bool,
    #[serde(default)]
    pub history: Vec<PresenceEvent>,
    pub last_seen: DateTime<Utc>,
}

impl MemberDetail {
    pub fn observed(
        source_server_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        method: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_server_id: source_server_id.into(),
            user_id: user_id.into(),
            username: username.into(),
            danger_level: 0,
            is_dangerous: false,
            history: vec![PresenceEvent {
                timestamp: now,
                method: method.to_string(),
            }],
            last_seen: now,
        }
    }

    /// Appends a presence event, evicting the oldest entry once the bound
    /// is reached.
    pub fn push_history(&mut self, event: PresenceEvent) {
        if self.history.len() >= MAX_HISTORY_ENTRIES {
            self.history.remove(0);
        }
        self.history.push(event);
    }

    /// Scores a member by the number of concurrent source servers they are
    /// present on: one server is unremarkable, each additional server adds
    /// a level, clamped at 3. Two or more additional servers marks the
    /// member dangerous.
    pub fn apply_concurrency(&mut self, concurrent_servers: usize) {
        self.danger_level = concurrent_servers.saturating_sub(1).min(3) as u8;
        self.is_dangerous = self.danger_level >= 2;
    }
}

/// A periodic member-count sample for a source server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCount {
    #[serde(rename = "guildId")]
    pub source_server_id: String,
    pub count: u64,
    pub timestamp: DateTime<Utc>,
}

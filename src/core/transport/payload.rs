// src/core/transport/payload.rs

//! Outbound submission payloads and their size accounting.

use crate::core::model::message::Embed;
use bytes::Bytes;
use serde::Serialize;

/// Hard provider limit on message content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Appended when content is clamped to the limit.
pub const TRUNCATION_SUFFIX: char = '…';

/// Hard provider limit on files per submission.
pub const MAX_FILES_PER_MESSAGE: usize = 10;

/// Files above this size are never uploaded; they degrade to a link.
pub const MAX_FILE_BYTES: u64 = 8 * 1024 * 1024;

/// Conservative whole-payload ceiling; above it the payload is split.
pub const SAFE_PAYLOAD_BYTES: u64 = 7_864_320; // 7.5 MiB

/// File-only follow-up groups after a split.
pub const SPLIT_GROUP_MAX_FILES: usize = 3;
pub const SPLIT_GROUP_MAX_BYTES: u64 = 6 * 1024 * 1024;

/// The provider-side mention gate. Replicated user content may only ever
/// ping roles; user and everyone pings are disabled wholesale.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AllowedMentions {
    /// Mention classes the provider may resolve ("roles" at most).
    pub parse: Vec<String>,
    /// Explicit role ids allowed to notify.
    pub roles: Vec<String>,
}

impl AllowedMentions {
    /// No pings at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Role pings only, restricted to the given ids.
    pub fn roles_only(roles: Vec<String>) -> Self {
        Self {
            parse: Vec::new(),
            roles,
        }
    }
}

/// One downloaded attachment ready for multipart upload.
#[derive(Debug, Clone)]
pub struct OutboundFile {
    pub filename: String,
    pub bytes: Bytes,
}

impl OutboundFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A fully rendered submission for one impersonation endpoint call.
#[derive(Debug, Clone, Default)]
pub struct OutboundPayload {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub files: Vec<OutboundFile>,
    /// Impersonated identity.
    pub username: String,
    pub avatar_url: Option<String>,
    pub allowed_mentions: AllowedMentions,
    /// Set when the target is a thread or forum post on the mirror.
    pub thread_id: Option<String>,
}

impl OutboundPayload {
    /// A payload with no content, no embeds and no files is refused by the
    /// provider and must never be submitted.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.embeds.is_empty() && self.files.is_empty()
    }

    /// Conservative size estimate: encoded content bytes, embed characters
    /// at the UTF-8 worst case of four bytes each, and raw file bytes.
    pub fn estimated_size(&self) -> u64 {
        let embed_chars: usize = self.embeds.iter().map(|e| e.char_weight() * 4).sum();
        let file_bytes: u64 = self.files.iter().map(|f| f.size()).sum();
        self.content.len() as u64 + embed_chars as u64 + file_bytes
    }

    /// Replaces an empty textual body so a files-only refusal (provider
    /// error 50035 on empty content with failed uploads) cannot occur
    /// after degradation.
    pub fn ensure_nonempty_fallback(&mut self, fallback: &str) {
        if self.is_empty() {
            self.content = fallback.to_string();
        }
    }
}

/// Clamps content to the provider limit, appending the truncation marker.
/// Content at exactly the limit passes through unchanged.
pub fn clamp_content(content: &str) -> String {
    let count = content.chars().count();
    if count <= MAX_CONTENT_CHARS {
        return content.to_string();
    }
    let mut clamped: String = content.chars().take(MAX_CONTENT_CHARS - 1).collect();
    clamped.push(TRUNCATION_SUFFIX);
    clamped
}

/// How a payload reaches the endpoint: in one call, or as a text-and-embeds
/// submission followed by file-only groups.
#[derive(Debug)]
pub enum SubmissionPlan {
    Single(OutboundPayload),
    Split {
        first: OutboundPayload,
        file_groups: Vec<Vec<OutboundFile>>,
    },
}

/// Splits an oversized payload. The text and embeds go first; files follow
/// in groups bounded by count and size. Callers have already replaced
/// individually oversized files with links.
pub fn plan_submission(payload: OutboundPayload) -> SubmissionPlan {
    if payload.estimated_size() <= SAFE_PAYLOAD_BYTES {
        return SubmissionPlan::Single(payload);
    }

    let mut first = payload.clone();
    let files = std::mem::take(&mut first.files);

    let mut file_groups: Vec<Vec<OutboundFile>> = Vec::new();
    let mut group: Vec<OutboundFile> = Vec::new();
    let mut group_bytes: u64 = 0;
    for file in files {
        let size = file.size();
        if !group.is_empty()
            && (group.len() >= SPLIT_GROUP_MAX_FILES || group_bytes + size > SPLIT_GROUP_MAX_BYTES)
        {
            file_groups.push(std::mem::take(&mut group));
            group_bytes = 0;
        }
        group_bytes += size;
        group.push(file);
    }
    if !group.is_empty() {
        file_groups.push(group);
    }

    SubmissionPlan::Split { first, file_groups }
}

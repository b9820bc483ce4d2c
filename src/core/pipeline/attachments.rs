// src/core/pipeline/attachments.rs

//! Attachment downloading with size caps and graceful degradation.
//!
//! Oversized files and downloads that keep failing degrade to a plain
//! link list appended to the message text, so the message itself still
//! replicates.

use crate::core::model::message::Attachment;
use crate::core::transport::payload::{MAX_FILE_BYTES, MAX_FILES_PER_MESSAGE, OutboundFile};
use std::time::Duration;
use tracing::debug;

const DOWNLOAD_ATTEMPTS: u32 = 3;
const BASE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Download throughput assumed when scaling the timeout to the reported
/// size.
const TIMEOUT_BYTES_PER_SECOND: u64 = 256 * 1024;

/// The outcome of fetching a message's attachments.
#[derive(Debug, Default)]
pub struct FetchedAttachments {
    pub files: Vec<OutboundFile>,
    /// Links standing in for files that could not be uploaded.
    pub link_fallbacks: Vec<String>,
}

impl FetchedAttachments {
    /// The text block appended to the message when any file degraded.
    pub fn fallback_block(&self) -> Option<String> {
        if self.link_fallbacks.is_empty() {
            return None;
        }
        Some(self.link_fallbacks.join("\n"))
    }
}

fn download_timeout(reported_size: u64) -> Duration {
    BASE_DOWNLOAD_TIMEOUT + Duration::from_secs(reported_size / TIMEOUT_BYTES_PER_SECOND)
}

fn link_line(attachment: &Attachment) -> String {
    format!("[{}]({})", attachment.filename, attachment.url)
}

/// Downloads every attachment of a message. Never fails as a whole;
/// individual failures degrade to links.
pub async fn fetch_attachments(
    http: &reqwest::Client,
    attachments: &[Attachment],
) -> FetchedAttachments {
    let mut out = FetchedAttachments::default();
    for attachment in attachments.iter().take(MAX_FILES_PER_MESSAGE) {
        if attachment.size >= MAX_FILE_BYTES {
            debug!(
                file = %attachment.filename,
                size = attachment.size,
                "attachment over the upload cap; degrading to link"
            );
            out.link_fallbacks.push(link_line(attachment));
            continue;
        }
        match download_one(http, attachment).await {
            Some(file) => out.files.push(file),
            None => out.link_fallbacks.push(link_line(attachment)),
        }
    }
    // Files past the per-message count cap degrade to links outright.
    for attachment in attachments.iter().skip(MAX_FILES_PER_MESSAGE) {
        out.link_fallbacks.push(link_line(attachment));
    }
    out
}

async fn download_one(http: &reqwest::Client, attachment: &Attachment) -> Option<OutboundFile> {
    let timeout = download_timeout(attachment.size);
    for attempt in 0..DOWNLOAD_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
        }
        let result = async {
            let response = http
                .get(&attachment.url)
                .timeout(timeout)
                .send()
                .await?
                .error_for_status()?;
            response.bytes().await
        }
        .await;

        match result {
            Ok(bytes) => {
                // The reported size can lie; verify what actually arrived.
                if bytes.len() as u64 >= MAX_FILE_BYTES {
                    debug!(file = %attachment.filename, "downloaded more than the cap; degrading to link");
                    return None;
                }
                return Some(OutboundFile {
                    filename: attachment.filename.clone(),
                    bytes,
                });
            }
            Err(e) => {
                debug!(
                    file = %attachment.filename,
                    attempt = attempt + 1,
                    error = %e,
                    "attachment download failed"
                );
            }
        }
    }
    None
}

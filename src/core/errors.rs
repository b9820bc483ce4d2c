// src/core/errors.rs

//! Defines the primary error type for the entire engine.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing all possible failures within the engine.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum MirrorError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Upstream rate limit hit, retry after {0:?}")]
    RateLimited(Duration),

    #[error("Access denied by the source: {0}")]
    AccessDenied(String),

    #[error("Not found on the source: {0}")]
    NotFound(String),

    #[error("Upstream server error: {0}")]
    UpstreamServerError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Store quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Duplicate key for '{0}'")]
    DuplicateKey(String),

    #[error("Invalid payload shape: {0}")]
    InvalidPayload(String),

    #[error("Outbound payload is empty")]
    EmptyPayload,

    #[error("Recovery failed for '{0}'")]
    RecoveryFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal Engine Error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Returns true for failures that a retry ladder may recover from:
    /// network-class errors, upstream 5xx responses, and timeouts.
    /// Rate limits are retryable too, but carry their own delay and are
    /// handled separately so they do not consume attempt budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MirrorError::Io(_)
                | MirrorError::HttpClientError(_)
                | MirrorError::UpstreamServerError(_)
                | MirrorError::Timeout(_)
        )
    }

    /// Returns the server-supplied delay for a rate-limit response, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MirrorError::RateLimited(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns true when the source refused or hid the requested object.
    /// These are the errors that drive auto-blacklisting.
    pub fn is_access_failure(&self) -> bool {
        matches!(self, MirrorError::AccessDenied(_) | MirrorError::NotFound(_))
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for MirrorError {
    fn from(e: std::io::Error) -> Self {
        MirrorError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return MirrorError::Timeout(e.to_string());
        }
        if let Some(status) = e.status() {
            if status.as_u16() == 403 {
                return MirrorError::AccessDenied(e.to_string());
            }
            if status.as_u16() == 404 {
                return MirrorError::NotFound(e.to_string());
            }
            if status.is_server_error() {
                return MirrorError::UpstreamServerError(e.to_string());
            }
        }
        MirrorError::HttpClientError(e.to_string())
    }
}

impl From<mongodb::error::Error> for MirrorError {
    fn from(e: mongodb::error::Error) -> Self {
        let text = e.to_string();
        // Atlas reports exhausted storage with this phrase; it must surface
        // as a critical alert rather than a generic store failure.
        if text.contains("over your space quota") {
            return MirrorError::QuotaExceeded(text);
        }
        if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(we)) =
            e.kind.as_ref()
        {
            if we.code == 11000 {
                return MirrorError::DuplicateKey(text);
            }
        }
        MirrorError::StoreError(text)
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        MirrorError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<String> for MirrorError {
    fn from(s: String) -> Self {
        MirrorError::Internal(s)
    }
}

// src/bin/emergency_purge.rs

//! Retention script for quota emergencies: removes all rows from
//! ProcessedMessages, Logs, MemberDetails, MemberCounts and RoleMentions
//! while preserving ServerConfig, Channels, Roles and MentionBlacklists.
//!
//! Exits non-zero on any error.

use anyhow::{Context, Result, anyhow};
use specular::core::store::{MongoStore, Store};
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
        ))
        .compact()
        .init();

    let uri = env::var("MONGODB_URI")
        .map_err(|_| anyhow!("MONGODB_URI must be set"))?;
    let store = MongoStore::connect(&uri)
        .await
        .context("failed to connect to the store")?;

    let report = store
        .emergency_purge()
        .await
        .context("emergency purge failed")?;
    println!(
        "purged {} rows (messages: {}, logs: {}, members: {}, counts: {}, mentions: {})",
        report.total(),
        report.processed_messages,
        report.logs,
        report.member_details,
        report.member_counts,
        report.role_mentions
    );
    Ok(())
}

// src/bin/purge_logs.rs

//! Retention script: removes every row from the Logs collection.
//!
//! Exits non-zero on any error so cron and operators can tell a failed
//! purge from an empty one.

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

    let removed = store
        .purge_logs()
        .await
        .context("failed to purge the Logs collection")?;
    println!("purged {removed} log rows");
    Ok(())
}

// src/config.rs

//! Manages engine configuration: loading, environment overrides, validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

/// Connection settings for the document store.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreConfig {
    /// Store DSN; overridden by `MONGODB_URI`.
    #[serde(default)]
    pub uri: String,
    /// Run against the in-memory store instead of MongoDB. Useful for dry
    /// runs; nothing survives a restart.
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            in_memory: false,
        }
    }
}

/// Credentials and endpoint of the chat provider.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Bot credential used by the control client (full admin on mirrors).
    #[serde(default)]
    pub bot_token: String,
    /// User credential used by the observation client (read-only source).
    #[serde(default)]
    pub user_token: String,
}

fn default_api_base() -> String {
    crate::core::transport::http::DEFAULT_API_BASE.to_string()
}

/// One replication domain: a source server observed into a mirror server,
/// plus the mirror-side log channels.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PairConfig {
    pub source_server_id: String,
    pub mirror_server_id: String,
    /// Rich error diagnostics with remediation hints.
    #[serde(default)]
    pub error_channel_id: Option<String>,
    /// Success notifications for newly created mirror channels.
    #[serde(default)]
    pub newroom_channel_id: Option<String>,
    /// Privileged state changes (auto-blacklist, auto-recovery).
    #[serde(default)]
    pub admin_channel_id: Option<String>,
    /// Replicated mention notifications.
    #[serde(default)]
    pub mention_channel_id: Option<String>,
}

/// Tunables of the replication behavior.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicationConfig {
    /// Delay between source channel polls; overridden by
    /// `DEFAULT_SCRAPE_DELAY` (milliseconds).
    #[serde(with = "humantime_serde", default = "default_scrape_delay")]
    pub scrape_delay: Duration,
    /// Whether bot-authored mentions may notify; overridden by
    /// `ALLOW_BOT_MENTIONS`.
    #[serde(default)]
    pub allow_bot_mentions: bool,
    /// Channels quiet for this many days are not auto-created; overridden
    /// by `INACTIVE_THRESHOLD_DAYS`.
    #[serde(default = "default_inactive_threshold_days")]
    pub inactive_threshold_days: u32,
    /// Glob patterns of source channel names never replicated.
    #[serde(default)]
    pub ignored_channels: Vec<String>,
    /// Author ids or name globs dropped at the pipeline's noise filter, on
    /// top of the built-in list.
    #[serde(default)]
    pub noise_authors: Vec<String>,
    /// Display name of the created impersonation endpoints.
    #[serde(default = "default_endpoint_name")]
    pub endpoint_name: String,
}

fn default_scrape_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_inactive_threshold_days() -> u32 {
    30
}

fn default_endpoint_name() -> String {
    "specular".to_string()
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            scrape_delay: default_scrape_delay(),
            allow_bot_mentions: false,
            inactive_threshold_days: default_inactive_threshold_days(),
            ignored_channels: Vec::new(),
            noise_authors: Vec::new(),
            endpoint_name: default_endpoint_name(),
        }
    }
}

/// The complete engine configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pairs: Vec<PairConfig>,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads and validates a configuration file, then applies environment
    /// overrides. Failure here is fatal; the engine cannot run without a
    /// valid configuration.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(uri) = env::var("MONGODB_URI") {
            self.store.uri = uri;
        }
        if let Ok(days) = env::var("INACTIVE_THRESHOLD_DAYS") {
            self.replication.inactive_threshold_days = days
                .parse()
                .map_err(|_| anyhow!("INACTIVE_THRESHOLD_DAYS must be an integer, got '{days}'"))?;
        }
        if let Ok(allow) = env::var("ALLOW_BOT_MENTIONS") {
            self.replication.allow_bot_mentions =
                matches!(allow.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(delay_ms) = env::var("DEFAULT_SCRAPE_DELAY") {
            let ms: u64 = delay_ms
                .parse()
                .map_err(|_| anyhow!("DEFAULT_SCRAPE_DELAY must be milliseconds, got '{delay_ms}'"))?;
            self.replication.scrape_delay = Duration::from_millis(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.store.in_memory && self.store.uri.is_empty() {
            return Err(anyhow!(
                "store.uri is required (or set MONGODB_URI, or store.in_memory = true)"
            ));
        }
        if self.provider.bot_token.is_empty() {
            return Err(anyhow!("provider.bot_token is required"));
        }
        if self.provider.user_token.is_empty() {
            return Err(anyhow!("provider.user_token is required"));
        }
        if self.pairs.is_empty() {
            return Err(anyhow!("at least one [[pairs]] entry is required"));
        }
        for pair in &self.pairs {
            if pair.source_server_id.is_empty() || pair.mirror_server_id.is_empty() {
                return Err(anyhow!(
                    "every pair needs both source_server_id and mirror_server_id"
                ));
            }
        }
        let mut mirrors: Vec<&str> = self.pairs.iter().map(|p| p.mirror_server_id.as_str()).collect();
        mirrors.sort_unstable();
        mirrors.dedup();
        if mirrors.len() != self.pairs.len() {
            return Err(anyhow!("a mirror server may be paired with only one source server"));
        }
        if self.replication.scrape_delay.is_zero() {
            return Err(anyhow!("replication.scrape_delay must be positive"));
        }
        Ok(())
    }
}

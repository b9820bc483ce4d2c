// src/core/state.rs

//! Defines the central `EngineState` struct, holding all shared state for
//! one replication domain.
//!
//! One `EngineState` exists per `(sourceServer, mirrorServer)` pair and is
//! threaded explicitly through the pipeline and every background task, so
//! tests can construct isolated instances instead of leaning on ambient
//! per-server singletons.

use crate::config::{Config, PairConfig};
use crate::core::activity::ActivityMonitor;
use crate::core::correspondence::CorrespondenceManager;
use crate::core::limiter::RateLimiter;
use crate::core::model::ServerPair;
use crate::core::notify::Notifier;
use crate::core::pipeline::classify::PendingCommand;
use crate::core::retry::RetryQueue;
use crate::core::store::SharedStore;
use crate::core::transport::webhook::EndpointFactory;
use crate::core::transport::{ControlClient, EndpointRegistry, ObservationClient};
use crate::core::ttl_cache::TtlCache;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Pending command invocations expire after a minute.
const PENDING_COMMAND_TTL: Duration = Duration::from_secs(60);

/// Channels that permanently failed stay muted for the session.
const FAILED_CHANNEL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Deduplication window for duplicate recovery notifications.
const RECENTLY_RECOVERED_TTL: Duration = Duration::from_secs(5 * 60);

/// Window for the silent-retry counters of blacklisted channels.
const BLACKLIST_SILENCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Window for once-per-session log throttles.
const THROTTLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The in-memory duplicate-suppression tables, all shaped as bounded TTL
/// caches so eviction behaves uniformly.
pub struct SessionCaches {
    /// Composite `(channelId, authorId, floor(ts/5s))` and interaction-id
    /// keys of command invocations awaiting their response.
    pub pending_commands: TtlCache<String, PendingCommand>,
    /// Source channels that exhausted recovery this session.
    pub failed_channels: TtlCache<String, ()>,
    /// Recovery keys that recently succeeded; dedupes notifications.
    pub recently_recovered: TtlCache<String, ()>,
    /// Silent-retry counters per blacklisted channel.
    pub blacklist_silence: TtlCache<String, u32>,
    /// One-shot log throttles (cap warnings and the like).
    pub log_throttle: TtlCache<String, ()>,
}

impl Default for SessionCaches {
    fn default() -> Self {
        Self {
            pending_commands: TtlCache::new(PENDING_COMMAND_TTL, 512),
            failed_channels: TtlCache::new(FAILED_CHANNEL_TTL, 512),
            recently_recovered: TtlCache::new(RECENTLY_RECOVERED_TTL, 256),
            blacklist_silence: TtlCache::new(BLACKLIST_SILENCE_TTL, 512),
            log_throttle: TtlCache::new(THROTTLE_TTL, 256),
        }
    }
}

impl SessionCaches {
    /// Eager TTL sweep across all tables, run from the janitor.
    pub fn sweep(&self) {
        self.pending_commands.sweep();
        self.failed_channels.sweep();
        self.recently_recovered.sweep();
        self.blacklist_silence.sweep();
        self.log_throttle.sweep();
    }

    /// Cleared when a periodic loop stops, per the cancellation contract.
    pub fn clear_session(&self) {
        self.failed_channels.clear();
        self.blacklist_silence.clear();
        self.log_throttle.clear();
    }
}

/// Bookkeeping behind the adaptive sync interval: 5 minutes while errors
/// are fresh, 30 by default, 60 once two hours pass without one.
pub struct SyncScheduler {
    started_at: Instant,
    inner: SyncMutex<SyncInner>,
}

struct SyncInner {
    last_error_at: Option<Instant>,
    consecutive_failures: u32,
}

const SYNC_INTERVAL_FAST: Duration = Duration::from_secs(5 * 60);
const SYNC_INTERVAL_DEFAULT: Duration = Duration::from_secs(30 * 60);
const SYNC_INTERVAL_SLOW: Duration = Duration::from_secs(60 * 60);
const SYNC_QUIET_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

impl Default for SyncScheduler {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            inner: SyncMutex::new(SyncInner {
                last_error_at: None,
                consecutive_failures: 0,
            }),
        }
    }
}

impl SyncScheduler {
    pub fn record_result(&self, ok: bool) {
        let mut inner = self.inner.lock();
        if ok {
            inner.consecutive_failures = 0;
        } else {
            inner.consecutive_failures += 1;
            inner.last_error_at = Some(Instant::now());
        }
    }

    pub fn current_interval(&self) -> Duration {
        let inner = self.inner.lock();
        if inner.consecutive_failures > 0 {
            return SYNC_INTERVAL_FAST;
        }
        let quiet_for = match inner.last_error_at {
            Some(at) => at.elapsed(),
            None => self.started_at.elapsed(),
        };
        if quiet_for >= SYNC_QUIET_WINDOW {
            SYNC_INTERVAL_SLOW
        } else {
            SYNC_INTERVAL_DEFAULT
        }
    }
}

/// Coarse counters surfaced by the janitor's status line.
#[derive(Default)]
pub struct EngineStats {
    pub events_seen: AtomicU64,
    pub messages_committed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub messages_skipped: AtomicU64,
    pub edits_applied: AtomicU64,
    pub messages_backfilled: AtomicU64,
}

impl EngineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Recovery keys currently in flight: at most one per key, each
/// individually cancellable.
#[derive(Default)]
pub struct RecoveryTracker {
    in_flight: DashMap<String, CancellationToken>,
}

impl RecoveryTracker {
    /// Claims a key for recovery. Returns `None` when a recovery is
    /// already running for it.
    pub fn claim(&self, key: &str) -> Option<CancellationToken> {
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let token = CancellationToken::new();
                v.insert(token.clone());
                Some(token)
            }
        }
    }

    pub fn release(&self, key: &str) {
        self.in_flight.remove(key);
    }

    /// Cancels the pending recovery for a key (a success elsewhere makes
    /// its retries moot).
    pub fn cancel(&self, key: &str) {
        if let Some((_, token)) = self.in_flight.remove(key) {
            token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.in_flight.iter() {
            entry.value().cancel();
        }
        self.in_flight.clear();
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// The central struct holding all shared state for one replication domain.
/// Wrapped in an `Arc` and handed to the pipeline, the background tasks
/// and the recovery machinery.
pub struct EngineState {
    pub config: Arc<Config>,
    pub pair_config: PairConfig,
    pub pair: ServerPair,
    pub store: SharedStore,
    pub control: Arc<dyn ControlClient>,
    pub observation: Arc<dyn ObservationClient>,
    /// Plain HTTP client for attachment downloads.
    pub http: reqwest::Client,
    pub endpoints: EndpointRegistry,
    pub correspondence: CorrespondenceManager,
    pub limiter: Arc<RateLimiter>,
    pub retries: RetryQueue,
    pub notifier: Notifier,
    pub activity: ActivityMonitor,
    pub recovery: RecoveryTracker,
    pub sync: SyncScheduler,
    pub session: SessionCaches,
    pub stats: EngineStats,
    /// Serializes topology mutations (and endpoint creation) per mirror
    /// server.
    pub topology_lock: Arc<Mutex<()>>,
    /// Engine-wide shutdown signal.
    pub shutdown: CancellationToken,
    /// Set once the mirror hit the hard channel cap this session.
    pub cap_refusal_logged: AtomicBool,
}

impl EngineState {
    pub fn new(
        config: Arc<Config>,
        pair_config: PairConfig,
        store: SharedStore,
        control: Arc<dyn ControlClient>,
        observation: Arc<dyn ObservationClient>,
        endpoint_factory: Arc<dyn EndpointFactory>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let pair = ServerPair::new(
            pair_config.source_server_id.clone(),
            pair_config.mirror_server_id.clone(),
        );
        let topology_lock = Arc::new(Mutex::new(()));
        let correspondence = CorrespondenceManager::new(
            store.clone(),
            control.clone(),
            observation.clone(),
            pair.clone(),
            topology_lock.clone(),
        );
        let notifier = Notifier::new(control.clone(), store.clone(), pair_config.clone());

        Arc::new(Self {
            config,
            pair_config,
            pair,
            store,
            control: control.clone(),
            observation,
            http: reqwest::Client::new(),
            endpoints: EndpointRegistry::new(endpoint_factory),
            correspondence,
            limiter: Arc::new(RateLimiter::new()),
            retries: RetryQueue::new(),
            notifier,
            activity: ActivityMonitor::new(Utc::now()),
            recovery: RecoveryTracker::default(),
            sync: SyncScheduler::default(),
            session: SessionCaches::default(),
            stats: EngineStats::default(),
            topology_lock,
            shutdown,
            cap_refusal_logged: AtomicBool::new(false),
        })
    }

    /// Endpoint display name for created webhooks.
    pub fn endpoint_name(&self) -> &str {
        &self.config.replication.endpoint_name
    }
}

// src/core/correspondence.rs

//! Translates source identifiers into mirror identifiers.
//!
//! Lookups are answered from a bounded LRU cache first, then from the
//! store; a store hit is verified against the mirror before it is cached,
//! so a resolved id always points at a channel that existed at call time.
//! Creation goes through the per-mirror topology lock so "create category
//! then channel" cannot interleave with another creation.

use crate::core::errors::MirrorError;
use crate::core::events::SourceChannel;
use crate::core::model::{ChannelKind, ChannelMapping, RoleMapping, ServerPair};
use crate::core::store::SharedStore;
use crate::core::transport::{ControlClient, CreateChannelRequest, MirrorChannel, ObservationClient};
use lru::LruCache;
use parking_lot::Mutex as SyncMutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CHANNEL_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();
const ROLE_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(256).unwrap();

pub struct CorrespondenceManager {
    store: SharedStore,
    control: Arc<dyn ControlClient>,
    observation: Arc<dyn ObservationClient>,
    pair: ServerPair,
    /// Serializes topology mutations per mirror server; shared with the
    /// sync and monitor loops through the engine state.
    topology_lock: Arc<Mutex<()>>,
    channel_cache: SyncMutex<LruCache<String, String>>,
    role_cache: SyncMutex<LruCache<String, String>>,
}

impl CorrespondenceManager {
    pub fn new(
        store: SharedStore,
        control: Arc<dyn ControlClient>,
        observation: Arc<dyn ObservationClient>,
        pair: ServerPair,
        topology_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            store,
            control,
            observation,
            pair,
            topology_lock,
            channel_cache: SyncMutex::new(LruCache::new(CHANNEL_CACHE_CAPACITY)),
            role_cache: SyncMutex::new(LruCache::new(ROLE_CACHE_CAPACITY)),
        }
    }

    pub fn pair(&self) -> &ServerPair {
        &self.pair
    }

    /// Resolves a source channel to a live mirror channel id.
    ///
    /// Returns `None` when no usable correspondence exists; callers decide
    /// whether that triggers auto-configuration or recovery.
    pub async fn resolve_channel(
        &self,
        source_channel_id: &str,
    ) -> Result<Option<String>, MirrorError> {
        if let Some(cached) = self.channel_cache.lock().get(source_channel_id).cloned() {
            return Ok(Some(cached));
        }

        let Some(mapping) = self
            .store
            .find_channel(source_channel_id, &self.pair.source_server_id)
            .await?
        else {
            return Ok(None);
        };
        let Some(mirror_id) = mapping.live_mirror_id() else {
            return Ok(None);
        };

        // A stored id may be stale (mirror channel deleted by hand); only a
        // verified id is handed out and cached.
        if !self.control.channel_exists(mirror_id).await? {
            debug!(
                source = source_channel_id,
                mirror = mirror_id,
                "stored mirror channel no longer exists"
            );
            return Ok(None);
        }

        let mirror_id = mirror_id.to_string();
        self.channel_cache
            .lock()
            .put(source_channel_id.to_string(), mirror_id.clone());
        Ok(Some(mirror_id))
    }

    /// Resolves a source role to its mirror role id. Same discipline as
    /// channels, minus the existence probe (roles are only ever removed
    /// through the engine itself).
    pub async fn resolve_role(&self, source_role_id: &str) -> Result<Option<String>, MirrorError> {
        if let Some(cached) = self.role_cache.lock().get(source_role_id).cloned() {
            return Ok(Some(cached));
        }
        let Some(mapping) = self
            .store
            .find_role(source_role_id, &self.pair.source_server_id)
            .await?
        else {
            return Ok(None);
        };
        let Some(mirror_id) = mapping.mirror_role_id.clone() else {
            return Ok(None);
        };
        self.role_cache
            .lock()
            .put(source_role_id.to_string(), mirror_id.clone());
        Ok(Some(mirror_id))
    }

    /// Idempotent upsert keyed by `(sourceChannelId, sourceServerId)`.
    pub async fn register_channel_mapping(
        &self,
        mapping: &ChannelMapping,
    ) -> Result<(), MirrorError> {
        self.store.upsert_channel(mapping).await?;
        let mut cache = self.channel_cache.lock();
        match mapping.live_mirror_id() {
            Some(mirror_id) => {
                cache.put(mapping.source_channel_id.clone(), mirror_id.to_string());
            }
            None => {
                cache.pop(&mapping.source_channel_id);
            }
        }
        Ok(())
    }

    pub async fn register_role_mapping(&self, mapping: &RoleMapping) -> Result<(), MirrorError> {
        self.store.upsert_role(mapping).await?;
        let mut cache = self.role_cache.lock();
        match &mapping.mirror_role_id {
            Some(mirror_id) => {
                cache.put(mapping.source_role_id.clone(), mirror_id.clone());
            }
            None => {
                cache.pop(&mapping.source_role_id);
            }
        }
        Ok(())
    }

    /// Drops a cached channel translation; used after fixes and deletions.
    pub fn invalidate_channel(&self, source_channel_id: &str) {
        self.channel_cache.lock().pop(source_channel_id);
    }

    pub fn invalidate_role(&self, source_role_id: &str) {
        self.role_cache.lock().pop(source_role_id);
    }

    /// Creates the mirror channel for a source channel, parenting it under
    /// the corresponding mirror category. An absent parent category is
    /// created first (one level of recursion is all the provider's
    /// topology allows).
    pub async fn auto_create_channel(
        &self,
        source: &SourceChannel,
    ) -> Result<MirrorChannel, MirrorError> {
        let _guard = self.topology_lock.lock().await;
        self.auto_create_channel_locked(source).await
    }

    /// Creation body; callers already holding the topology lock use this
    /// variant directly.
    pub async fn auto_create_channel_locked(
        &self,
        source: &SourceChannel,
    ) -> Result<MirrorChannel, MirrorError> {
        let parent_mirror_id = match &source.parent_id {
            Some(parent_source_id) => {
                self.ensure_parent_category(parent_source_id).await?
            }
            None => None,
        };

        // News channels degrade to a plain text channel with a marker
        // topic when the mirror cannot host announcement channels.
        let (kind, topic) = match source.kind {
            ChannelKind::News => (
                ChannelKind::Text,
                Some(format!("[announcements] {}", source.name)),
            ),
            other => (other, None),
        };

        let created = self
            .control
            .create_channel(
                &self.pair.mirror_server_id,
                CreateChannelRequest {
                    name: source.name.clone(),
                    kind,
                    parent_mirror_id,
                    topic,
                },
            )
            .await?;

        let mut mapping = ChannelMapping::new(
            &source.id,
            &self.pair.source_server_id,
            &source.name,
            source.kind,
        );
        mapping.mirror_channel_id = Some(created.id.clone());
        mapping.parent_source_id = source.parent_id.clone();
        mapping.scraped = source.kind.is_replication_target();
        self.register_channel_mapping(&mapping).await?;

        info!(
            source = %source.id,
            mirror = %created.id,
            name = %source.name,
            "created mirror channel"
        );
        Ok(created)
    }

    /// Resolves (or creates) the mirror category for a source parent id.
    /// Categories are only ever created on demand, from here.
    async fn ensure_parent_category(
        &self,
        parent_source_id: &str,
    ) -> Result<Option<String>, MirrorError> {
        if let Some(existing) = self
            .store
            .find_channel(parent_source_id, &self.pair.source_server_id)
            .await?
        {
            if let Some(mirror_id) = existing.live_mirror_id() {
                if self.control.channel_exists(mirror_id).await? {
                    return Ok(Some(mirror_id.to_string()));
                }
            }
            // Mapping exists but the mirror side is gone; recreate below
            // under the same name.
            let created = self
                .control
                .create_channel(
                    &self.pair.mirror_server_id,
                    CreateChannelRequest {
                        name: existing.name.clone(),
                        kind: ChannelKind::Category,
                        parent_mirror_id: None,
                        topic: None,
                    },
                )
                .await?;
            let mut fixed = existing;
            fixed.mirror_channel_id = Some(created.id.clone());
            self.register_channel_mapping(&fixed).await?;
            return Ok(Some(created.id));
        }

        // No mapping yet: learn the category from the source and create it.
        // One level of recursion is all the provider's topology allows.
        let Some(parent) = self.observation.fetch_thread_by_id(parent_source_id).await? else {
            warn!(
                parent = parent_source_id,
                "source parent not visible; creating channel unparented"
            );
            return Ok(None);
        };
        if !parent.kind.is_category() {
            return Ok(None);
        }
        let created = self
            .control
            .create_channel(
                &self.pair.mirror_server_id,
                CreateChannelRequest {
                    name: parent.name.clone(),
                    kind: ChannelKind::Category,
                    parent_mirror_id: None,
                    topic: None,
                },
            )
            .await?;
        let mut mapping = ChannelMapping::new(
            parent_source_id,
            &self.pair.source_server_id,
            &parent.name,
            ChannelKind::Category,
        );
        mapping.mirror_channel_id = Some(created.id.clone());
        self.register_channel_mapping(&mapping).await?;
        Ok(Some(created.id))
    }
}

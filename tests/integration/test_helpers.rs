// tests/integration/test_helpers.rs

//! Shared fixtures: in-memory mock transports and an engine state builder.

use async_trait::async_trait;
use parking_lot::Mutex;
use specular::config::{Config, PairConfig, ProviderConfig, ReplicationConfig, StoreConfig};
use specular::core::errors::MirrorError;
use specular::core::events::{SourceChannel, SourceMember, SourceRole};
use specular::core::model::message::{Embed, SourceAuthor, SourceMessage};
use specular::core::model::ChannelKind;
use specular::core::state::EngineState;
use specular::core::store::MemoryStore;
use specular::core::transport::payload::OutboundPayload;
use specular::core::transport::webhook::{
    EndpointFactory, EndpointHandle, ImpersonationEndpoint, SentMessage,
};
use specular::core::transport::{
    ChannelAccess, ControlClient, CreateChannelRequest, CreateRoleRequest, ForumPostRequest,
    MirrorChannel, MirrorEmoji, MirrorRole, ObservationClient, TransportResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

pub const SRC_SERVER: &str = "10000000000000000001";
pub const MIR_SERVER: &str = "20000000000000000001";

/// A 17-digit-style id for fixtures.
pub fn id(n: u64) -> String {
    format!("{:017}", n)
}

pub fn author(user_id: &str, name: &str) -> SourceAuthor {
    SourceAuthor {
        id: user_id.to_string(),
        username: name.to_string(),
        avatar_url: Some(format!("https://cdn.example/{name}.png")),
        is_bot: false,
        is_app: false,
    }
}

pub fn message(msg_id: &str, channel_id: &str, content: &str) -> SourceMessage {
    SourceMessage {
        id: msg_id.to_string(),
        channel_id: channel_id.to_string(),
        author: author("90000000000000000001", "alice"),
        content: content.to_string(),
        timestamp: chrono::Utc::now(),
        ..Default::default()
    }
}

// --- Mock control client -------------------------------------------------

pub struct MockControl {
    next_id: AtomicU64,
    pub channels: Mutex<Vec<MirrorChannel>>,
    pub roles: Mutex<Vec<MirrorRole>>,
    pub emojis: Mutex<Vec<MirrorEmoji>>,
    pub posted: Mutex<Vec<(String, Option<String>, Option<Embed>)>>,
    pub reactions: Mutex<Vec<(String, String, String)>>,
    pub created_channels: Mutex<Vec<MirrorChannel>>,
    pub updated_roles: Mutex<Vec<(String, CreateRoleRequest)>>,
}

impl Default for MockControl {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(5_000),
            channels: Mutex::new(Vec::new()),
            roles: Mutex::new(Vec::new()),
            emojis: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
            created_channels: Mutex::new(Vec::new()),
            updated_roles: Mutex::new(Vec::new()),
        }
    }
}

impl MockControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fresh_id(&self) -> String {
        id(30_000_000_000_000_000 + self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn seed_channel(&self, channel_id: &str, name: &str, kind: ChannelKind) {
        self.channels.lock().push(MirrorChannel {
            id: channel_id.to_string(),
            name: name.to_string(),
            kind,
            parent_id: None,
        });
    }

    /// Fills the mirror with text channels to exercise the cap logic.
    pub fn seed_bulk_channels(&self, count: usize) {
        let mut channels = self.channels.lock();
        for n in 0..count {
            channels.push(MirrorChannel {
                id: id(40_000_000_000_000_000 + n as u64),
                name: format!("filler-{n}"),
                kind: ChannelKind::Text,
                parent_id: None,
            });
        }
    }
}

#[async_trait]
impl ControlClient for MockControl {
    async fn fetch_channels(&self, _mirror_server_id: &str) -> TransportResult<Vec<MirrorChannel>> {
        Ok(self.channels.lock().clone())
    }

    async fn fetch_roles(&self, _mirror_server_id: &str) -> TransportResult<Vec<MirrorRole>> {
        Ok(self.roles.lock().clone())
    }

    async fn create_channel(
        &self,
        _mirror_server_id: &str,
        request: CreateChannelRequest,
    ) -> TransportResult<MirrorChannel> {
        let created = MirrorChannel {
            id: self.fresh_id(),
            name: request.name.clone(),
            kind: request.kind,
            parent_id: request.parent_mirror_id.clone(),
        };
        self.channels.lock().push(created.clone());
        self.created_channels.lock().push(created.clone());
        Ok(created)
    }

    async fn create_role(
        &self,
        _mirror_server_id: &str,
        request: CreateRoleRequest,
    ) -> TransportResult<MirrorRole> {
        let created = MirrorRole {
            id: self.fresh_id(),
            name: request.name.clone(),
            permissions: request.permissions,
        };
        self.roles.lock().push(created.clone());
        Ok(created)
    }

    async fn update_role(
        &self,
        _mirror_server_id: &str,
        mirror_role_id: &str,
        request: CreateRoleRequest,
    ) -> TransportResult<()> {
        self.updated_roles
            .lock()
            .push((mirror_role_id.to_string(), request));
        Ok(())
    }

    async fn create_webhook(
        &self,
        mirror_channel_id: &str,
        _name: &str,
    ) -> TransportResult<EndpointHandle> {
        Ok(EndpointHandle {
            id: format!("wh-{mirror_channel_id}"),
            secret: "hook-secret".to_string(),
        })
    }

    async fn create_forum_post(
        &self,
        mirror_forum_id: &str,
        request: ForumPostRequest,
    ) -> TransportResult<MirrorChannel> {
        let created = MirrorChannel {
            id: self.fresh_id(),
            name: request.title.clone(),
            kind: ChannelKind::PublicThread,
            parent_id: Some(mirror_forum_id.to_string()),
        };
        self.channels.lock().push(created.clone());
        self.created_channels.lock().push(created.clone());
        Ok(created)
    }

    async fn start_thread_from_message(
        &self,
        mirror_channel_id: &str,
        _mirror_message_id: &str,
        name: &str,
    ) -> TransportResult<MirrorChannel> {
        let created = MirrorChannel {
            id: self.fresh_id(),
            name: name.to_string(),
            kind: ChannelKind::PublicThread,
            parent_id: Some(mirror_channel_id.to_string()),
        };
        self.channels.lock().push(created.clone());
        Ok(created)
    }

    async fn start_thread(
        &self,
        mirror_channel_id: &str,
        name: &str,
    ) -> TransportResult<MirrorChannel> {
        let created = MirrorChannel {
            id: self.fresh_id(),
            name: name.to_string(),
            kind: ChannelKind::PublicThread,
            parent_id: Some(mirror_channel_id.to_string()),
        };
        self.channels.lock().push(created.clone());
        self.created_channels.lock().push(created.clone());
        Ok(created)
    }

    async fn channel_exists(&self, mirror_channel_id: &str) -> TransportResult<bool> {
        Ok(self
            .channels
            .lock()
            .iter()
            .any(|c| c.id == mirror_channel_id))
    }

    async fn add_reaction(
        &self,
        mirror_channel_id: &str,
        mirror_message_id: &str,
        emoji: &str,
    ) -> TransportResult<()> {
        self.reactions.lock().push((
            mirror_channel_id.to_string(),
            mirror_message_id.to_string(),
            emoji.to_string(),
        ));
        Ok(())
    }

    async fn fetch_emojis(&self, _mirror_server_id: &str) -> TransportResult<Vec<MirrorEmoji>> {
        Ok(self.emojis.lock().clone())
    }

    async fn post_message(
        &self,
        mirror_channel_id: &str,
        content: Option<String>,
        embed: Option<Embed>,
    ) -> TransportResult<String> {
        self.posted
            .lock()
            .push((mirror_channel_id.to_string(), content, embed));
        Ok(self.fresh_id())
    }
}

// --- Mock observation client ---------------------------------------------

#[derive(Default)]
pub struct MockObservation {
    pub channels: Mutex<Vec<SourceChannel>>,
    pub roles: Mutex<Vec<SourceRole>>,
    pub members: Mutex<Vec<SourceMember>>,
    pub messages: Mutex<HashMap<String, Vec<SourceMessage>>>,
    pub access: Mutex<HashMap<String, ChannelAccess>>,
    pub member_count: AtomicU64,
}

impl MockObservation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_channel(&self, channel_id: &str, name: &str, kind: ChannelKind) {
        self.channels.lock().push(SourceChannel {
            id: channel_id.to_string(),
            server_id: SRC_SERVER.to_string(),
            name: name.to_string(),
            kind,
            parent_id: None,
        });
    }

    /// Newest-first history, the way the provider returns it.
    pub fn seed_history(&self, channel_id: &str, history: Vec<SourceMessage>) {
        self.messages
            .lock()
            .insert(channel_id.to_string(), history);
    }

    pub fn deny_access(&self, channel_id: &str) {
        self.access
            .lock()
            .insert(channel_id.to_string(), ChannelAccess::Denied);
    }
}

#[async_trait]
impl ObservationClient for MockObservation {
    async fn fetch_guild_channels(
        &self,
        _source_server_id: &str,
    ) -> TransportResult<Vec<SourceChannel>> {
        Ok(self.channels.lock().clone())
    }

    async fn fetch_guild_roles(&self, _source_server_id: &str) -> TransportResult<Vec<SourceRole>> {
        Ok(self.roles.lock().clone())
    }

    async fn fetch_guild_member_count(&self, _source_server_id: &str) -> TransportResult<u64> {
        Ok(self.member_count.load(Ordering::SeqCst))
    }

    async fn fetch_guild_members(
        &self,
        _source_server_id: &str,
        limit: u32,
        query: Option<&str>,
    ) -> TransportResult<Vec<SourceMember>> {
        let members = self.members.lock();
        let filtered: Vec<SourceMember> = members
            .iter()
            .filter(|m| match query {
                Some(prefix) => m.username.to_lowercase().starts_with(prefix),
                None => true,
            })
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(filtered)
    }

    async fn request_all_members(
        &self,
        _source_server_id: &str,
    ) -> TransportResult<Vec<SourceMember>> {
        Ok(self.members.lock().clone())
    }

    async fn fetch_thread_by_id(&self, thread_id: &str) -> TransportResult<Option<SourceChannel>> {
        Ok(self
            .channels
            .lock()
            .iter()
            .find(|c| c.id == thread_id)
            .cloned())
    }

    async fn fetch_channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
        _before: Option<&str>,
        _after: Option<&str>,
    ) -> TransportResult<Vec<SourceMessage>> {
        Ok(self
            .messages
            .lock()
            .get(channel_id)
            .map(|m| m.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn test_channel_access(&self, channel_id: &str) -> TransportResult<ChannelAccess> {
        Ok(self
            .access
            .lock()
            .get(channel_id)
            .copied()
            .unwrap_or(ChannelAccess::Accessible))
    }
}

// --- Mock impersonation endpoints ----------------------------------------

pub struct MockEndpoint {
    handle: EndpointHandle,
    next_id: AtomicU64,
    pub sends: Mutex<Vec<OutboundPayload>>,
    pub sent_ids: Mutex<Vec<String>>,
    pub edits: Mutex<Vec<(String, OutboundPayload)>>,
}

impl MockEndpoint {
    fn new(handle: EndpointHandle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            next_id: AtomicU64::new(1),
            sends: Mutex::new(Vec::new()),
            sent_ids: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ImpersonationEndpoint for MockEndpoint {
    fn handle(&self) -> &EndpointHandle {
        &self.handle
    }

    async fn send(&self, payload: &OutboundPayload) -> TransportResult<SentMessage> {
        if payload.is_empty() {
            return Err(MirrorError::EmptyPayload);
        }
        let message_id = format!(
            "{}-m{}",
            self.handle.id,
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        self.sends.lock().push(payload.clone());
        self.sent_ids.lock().push(message_id.clone());
        Ok(SentMessage { id: message_id })
    }

    async fn edit_message(
        &self,
        message_id: &str,
        payload: &OutboundPayload,
    ) -> TransportResult<()> {
        self.edits
            .lock()
            .push((message_id.to_string(), payload.clone()));
        Ok(())
    }
}

/// Hands out one shared mock endpoint per handle id, so tests can inspect
/// what went through `wh-<mirror channel id>`.
#[derive(Default)]
pub struct MockEndpointFactory {
    endpoints: Mutex<HashMap<String, Arc<MockEndpoint>>>,
}

impl MockEndpointFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn endpoint_for(&self, handle_id: &str) -> Option<Arc<MockEndpoint>> {
        self.endpoints.lock().get(handle_id).cloned()
    }

    pub fn endpoint_for_channel(&self, mirror_channel_id: &str) -> Option<Arc<MockEndpoint>> {
        self.endpoint_for(&format!("wh-{mirror_channel_id}"))
    }
}

impl EndpointFactory for MockEndpointFactory {
    fn endpoint(&self, handle: EndpointHandle) -> Arc<dyn ImpersonationEndpoint> {
        let mut endpoints = self.endpoints.lock();
        let endpoint = endpoints
            .entry(handle.id.clone())
            .or_insert_with(|| MockEndpoint::new(handle));
        endpoint.clone()
    }
}

// --- State builder --------------------------------------------------------

pub struct TestHarness {
    pub state: Arc<EngineState>,
    pub store: Arc<MemoryStore>,
    pub control: Arc<MockControl>,
    pub observation: Arc<MockObservation>,
    pub endpoints: Arc<MockEndpointFactory>,
}

pub fn test_config() -> Config {
    Config {
        log_level: "warn".to_string(),
        store: StoreConfig {
            uri: String::new(),
            in_memory: true,
        },
        provider: ProviderConfig::default(),
        pairs: vec![test_pair()],
        replication: ReplicationConfig::default(),
    }
}

pub fn test_pair() -> PairConfig {
    PairConfig {
        source_server_id: SRC_SERVER.to_string(),
        mirror_server_id: MIR_SERVER.to_string(),
        error_channel_id: Some("err-channel".to_string()),
        newroom_channel_id: Some("newroom-channel".to_string()),
        admin_channel_id: Some("admin-channel".to_string()),
        mention_channel_id: Some("mention-channel".to_string()),
    }
}

pub fn harness() -> TestHarness {
    harness_with_config(test_config())
}

pub fn harness_with_config(config: Config) -> TestHarness {
    let store = Arc::new(MemoryStore::new());
    let control = MockControl::new();
    let observation = MockObservation::new();
    let endpoints = MockEndpointFactory::new();
    let pair = config.pairs[0].clone();
    let state = EngineState::new(
        Arc::new(config),
        pair,
        store.clone(),
        control.clone(),
        observation.clone(),
        endpoints.clone(),
        CancellationToken::new(),
    );
    TestHarness {
        state,
        store,
        control,
        observation,
        endpoints,
    }
}

/// Registers a channel mapping and seeds the mirror side so resolution
/// verifies.
pub async fn map_channel(
    h: &TestHarness,
    source_channel_id: &str,
    mirror_channel_id: &str,
    name: &str,
) {
    h.control.seed_channel(mirror_channel_id, name, ChannelKind::Text);
    let mut mapping = specular::core::model::ChannelMapping::new(
        source_channel_id,
        SRC_SERVER,
        name,
        ChannelKind::Text,
    );
    mapping.mirror_channel_id = Some(mirror_channel_id.to_string());
    mapping.scraped = true;
    h.state
        .correspondence
        .register_channel_mapping(&mapping)
        .await
        .expect("mapping registers");
}

/// Polls until `check` passes or the (possibly virtual) timeout elapses.
pub async fn wait_until<F: Fn() -> bool>(check: F, timeout: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
}

// src/core/transport/webhook.rs

//! Per-mirror-channel impersonation endpoints ("webhooks").
//!
//! An endpoint is identified by an `(id, secret)` pair, posts messages
//! under an arbitrary username and avatar, and can later edit what it
//! posted. One endpoint exists per mirror channel; the registry caches
//! them and serializes creation per mirror server.

use super::payload::OutboundPayload;
use super::{ControlClient, TransportResult};
use crate::core::errors::MirrorError;
use crate::core::model::message::Embed;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for an endpoint call without file uploads.
const BASE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra upload allowance per 256 KiB of file payload.
const TIMEOUT_BYTES_PER_SECOND: u64 = 256 * 1024;

/// The `(id, secret)` pair identifying one impersonation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointHandle {
    pub id: String,
    pub secret: String,
}

/// A successfully committed mirror message.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: String,
}

#[async_trait]
pub trait ImpersonationEndpoint: Send + Sync {
    fn handle(&self) -> &EndpointHandle;

    async fn send(&self, payload: &OutboundPayload) -> TransportResult<SentMessage>;

    async fn edit_message(
        &self,
        message_id: &str,
        payload: &OutboundPayload,
    ) -> TransportResult<()>;
}

/// Builds endpoints from handles; swapped out by tests.
pub trait EndpointFactory: Send + Sync {
    fn endpoint(&self, handle: EndpointHandle) -> Arc<dyn ImpersonationEndpoint>;
}

/// Converts a model embed into the provider's wire shape.
pub(crate) fn embed_to_wire(embed: &Embed) -> Value {
    let mut wire = serde_json::Map::new();
    if let Some(t) = &embed.title {
        wire.insert("title".into(), json!(t));
    }
    if let Some(d) = &embed.description {
        wire.insert("description".into(), json!(d));
    }
    if let Some(u) = &embed.url {
        wire.insert("url".into(), json!(u));
    }
    if let Some(c) = embed.color {
        wire.insert("color".into(), json!(c));
    }
    if !embed.fields.is_empty() {
        let fields: Vec<Value> = embed
            .fields
            .iter()
            .map(|f| json!({ "name": f.name, "value": f.value, "inline": f.inline }))
            .collect();
        wire.insert("fields".into(), json!(fields));
    }
    if let Some(a) = &embed.author {
        wire.insert("author".into(), json!({ "name": a.name, "icon_url": a.icon_url }));
    }
    if let Some(f) = &embed.footer {
        wire.insert("footer".into(), json!({ "text": f.text, "icon_url": f.icon_url }));
    }
    if let Some(i) = &embed.image_url {
        wire.insert("image".into(), json!({ "url": i }));
    }
    if let Some(t) = &embed.thumbnail_url {
        wire.insert("thumbnail".into(), json!({ "url": t }));
    }
    Value::Object(wire)
}

fn payload_json(payload: &OutboundPayload, include_identity: bool) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("content".into(), json!(payload.content));
    // An omitted embed list preserves existing embeds on edits; sends
    // behave the same either way.
    if !payload.embeds.is_empty() {
        let embeds: Vec<Value> = payload.embeds.iter().map(embed_to_wire).collect();
        body.insert("embeds".into(), json!(embeds));
    }
    body.insert(
        "allowed_mentions".into(),
        json!({
            "parse": payload.allowed_mentions.parse,
            "roles": payload.allowed_mentions.roles,
        }),
    );
    if include_identity {
        body.insert("username".into(), json!(payload.username));
        if let Some(avatar) = &payload.avatar_url {
            body.insert("avatar_url".into(), json!(avatar));
        }
    }
    Value::Object(body)
}

/// The REST-backed endpoint implementation.
pub struct HttpEndpoint {
    http: reqwest::Client,
    base_url: String,
    handle: EndpointHandle,
}

impl HttpEndpoint {
    pub fn new(http: reqwest::Client, base_url: String, handle: EndpointHandle) -> Self {
        Self {
            http,
            base_url,
            handle,
        }
    }

    fn execute_url(&self) -> String {
        format!(
            "{}/webhooks/{}/{}",
            self.base_url, self.handle.id, self.handle.secret
        )
    }

    fn upload_timeout(payload: &OutboundPayload) -> Duration {
        let file_bytes: u64 = payload.files.iter().map(|f| f.size()).sum();
        BASE_REQUEST_TIMEOUT + Duration::from_secs(file_bytes / TIMEOUT_BYTES_PER_SECOND)
    }

    async fn check(response: reqwest::Response) -> TransportResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        match status.as_u16() {
            429 => {
                let secs = body
                    .get("retry_after")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0);
                Err(MirrorError::RateLimited(Duration::from_secs_f64(secs)))
            }
            403 => Err(MirrorError::AccessDenied(body.to_string())),
            404 => Err(MirrorError::NotFound(body.to_string())),
            400 => Err(MirrorError::InvalidPayload(body.to_string())),
            s if s >= 500 => Err(MirrorError::UpstreamServerError(body.to_string())),
            _ => Err(MirrorError::HttpClientError(format!(
                "endpoint call failed with {status}: {body}"
            ))),
        }
    }

    fn apply_thread_query(payload: &OutboundPayload, query: &mut Vec<(String, String)>) {
        if let Some(thread_id) = &payload.thread_id {
            query.push(("thread_id".into(), thread_id.clone()));
        }
    }
}

#[async_trait]
impl ImpersonationEndpoint for HttpEndpoint {
    fn handle(&self) -> &EndpointHandle {
        &self.handle
    }

    async fn send(&self, payload: &OutboundPayload) -> TransportResult<SentMessage> {
        let mut query = vec![("wait".to_string(), "true".to_string())];
        Self::apply_thread_query(payload, &mut query);
        let body = payload_json(payload, true);

        let request = self
            .http
            .post(self.execute_url())
            .query(&query)
            .timeout(Self::upload_timeout(payload));

        let response = if payload.files.is_empty() {
            request.json(&body).send().await?
        } else {
            let mut form =
                reqwest::multipart::Form::new().text("payload_json", body.to_string());
            for (index, file) in payload.files.iter().enumerate() {
                let part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                    .file_name(file.filename.clone());
                form = form.part(format!("files[{index}]"), part);
            }
            request.multipart(form).send().await?
        };

        let response = Self::check(response).await?;
        let body: Value = response.json().await?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| MirrorError::InvalidPayload("endpoint returned no message id".into()))?
            .to_string();
        Ok(SentMessage { id })
    }

    async fn edit_message(
        &self,
        message_id: &str,
        payload: &OutboundPayload,
    ) -> TransportResult<()> {
        let mut query: Vec<(String, String)> = Vec::new();
        Self::apply_thread_query(payload, &mut query);
        // Identity fields are immutable on edit.
        let body = payload_json(payload, false);
        let response = self
            .http
            .patch(format!("{}/messages/{}", self.execute_url(), message_id))
            .query(&query)
            .timeout(BASE_REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// Builds `HttpEndpoint`s sharing one `reqwest` client.
pub struct HttpEndpointFactory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEndpointFactory {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl EndpointFactory for HttpEndpointFactory {
    fn endpoint(&self, handle: EndpointHandle) -> Arc<dyn ImpersonationEndpoint> {
        Arc::new(HttpEndpoint::new(
            self.http.clone(),
            self.base_url.clone(),
            handle,
        ))
    }
}

/// Caches one endpoint per mirror channel and serializes creation so two
/// workers cannot race a duplicate webhook into existence.
pub struct EndpointRegistry {
    factory: Arc<dyn EndpointFactory>,
    cache: DashMap<String, Arc<dyn ImpersonationEndpoint>>,
}

impl EndpointRegistry {
    pub fn new(factory: Arc<dyn EndpointFactory>) -> Self {
        Self {
            factory,
            cache: DashMap::new(),
        }
    }

    /// Rebuilds an endpoint from stored credentials (used for edits on
    /// records committed in an earlier session).
    pub fn rehydrate(&self, handle: EndpointHandle) -> Arc<dyn ImpersonationEndpoint> {
        self.factory.endpoint(handle)
    }

    /// Returns the cached endpoint for a mirror channel, creating it under
    /// the given per-mirror-server guard on first use.
    pub async fn for_channel(
        &self,
        mirror_channel_id: &str,
        endpoint_name: &str,
        control: &dyn ControlClient,
        creation_guard: &Mutex<()>,
    ) -> TransportResult<Arc<dyn ImpersonationEndpoint>> {
        if let Some(cached) = self.cache.get(mirror_channel_id) {
            return Ok(cached.clone());
        }
        let _guard = creation_guard.lock().await;
        if let Some(cached) = self.cache.get(mirror_channel_id) {
            return Ok(cached.clone());
        }
        let handle = control.create_webhook(mirror_channel_id, endpoint_name).await?;
        let endpoint = self.factory.endpoint(handle);
        self.cache
            .insert(mirror_channel_id.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    /// Drops the cached endpoint for a channel (e.g. after its mirror
    /// channel was recreated).
    pub fn invalidate(&self, mirror_channel_id: &str) {
        self.cache.remove(mirror_channel_id);
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

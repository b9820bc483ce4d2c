// src/core/transport/http.rs

//! REST implementations of the control and observation clients.
//!
//! Both are deliberately mechanical: translate one trait call into one
//! provider REST call and map the status code onto the engine's error
//! taxonomy. Everything interesting (retries, rate budgeting, blacklist
//! policy) lives in the engine, not here.

use super::{
    ChannelAccess, ControlClient, CreateChannelRequest, CreateRoleRequest, ForumPostRequest,
    MirrorChannel, MirrorEmoji, MirrorRole, ObservationClient, TransportResult,
};
use crate::core::errors::MirrorError;
use crate::core::events::{SourceChannel, SourceMember, SourceRole};
use crate::core::model::ChannelKind;
use crate::core::model::message::{Embed, SourceMessage};
use crate::core::transport::webhook::{EndpointHandle, embed_to_wire};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Threads opened by the engine archive after a day of silence.
const DEFAULT_AUTO_ARCHIVE_MINUTES: u32 = 1440;

/// Maps a non-success response onto the error taxonomy and parses the body
/// of a success.
async fn check_json(response: reqwest::Response) -> TransportResult<Value> {
    let status = response.status();
    if status.is_success() {
        if status.as_u16() == 204 {
            return Ok(Value::Null);
        }
        return Ok(response.json().await.unwrap_or(Value::Null));
    }
    let body: Value = response.json().await.unwrap_or(Value::Null);
    match status.as_u16() {
        429 => {
            let secs = body.get("retry_after").and_then(Value::as_f64).unwrap_or(1.0);
            Err(MirrorError::RateLimited(Duration::from_secs_f64(secs)))
        }
        403 => Err(MirrorError::AccessDenied(body.to_string())),
        404 => Err(MirrorError::NotFound(body.to_string())),
        400 => Err(MirrorError::InvalidPayload(body.to_string())),
        s if s >= 500 => Err(MirrorError::UpstreamServerError(body.to_string())),
        _ => Err(MirrorError::HttpClientError(format!(
            "provider call failed with {status}: {body}"
        ))),
    }
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn opt_str_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn kind_field(value: &Value) -> ChannelKind {
    ChannelKind::from(value.get("type").and_then(Value::as_u64).unwrap_or(0) as u8)
}

fn parse_mirror_channel(value: &Value) -> MirrorChannel {
    MirrorChannel {
        id: str_field(value, "id"),
        name: str_field(value, "name"),
        kind: kind_field(value),
        parent_id: opt_str_field(value, "parent_id"),
    }
}

fn parse_source_channel(value: &Value, server_id: &str) -> SourceChannel {
    SourceChannel {
        id: str_field(value, "id"),
        server_id: value
            .get("guild_id")
            .and_then(Value::as_str)
            .unwrap_or(server_id)
            .to_string(),
        name: str_field(value, "name"),
        kind: kind_field(value),
        parent_id: opt_str_field(value, "parent_id"),
    }
}

fn parse_source_message(value: &Value) -> SourceMessage {
    // Tolerant parsing: a malformed message becomes a mostly-empty one and
    // is dropped by the pipeline's filters rather than killing the poll.
    serde_json::from_value(normalize_message_value(value)).unwrap_or_default()
}

/// Reshapes the provider's message JSON into the engine's camelCase model.
fn normalize_message_value(value: &Value) -> Value {
    let author = value.get("author").cloned().unwrap_or(Value::Null);
    let embeds: Vec<Value> = value
        .get("embeds")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|e| {
                    json!({
                        "title": e.get("title"),
                        "description": e.get("description"),
                        "url": e.get("url"),
                        "color": e.get("color"),
                        "fields": e.get("fields").cloned().unwrap_or(json!([])),
                        "author": e.get("author").and_then(|a| a.get("name")).map(|n| json!({"name": n})),
                        "footer": e.get("footer").and_then(|f| f.get("text")).map(|t| json!({"text": t})),
                        "imageUrl": e.get("image").and_then(|i| i.get("url")),
                        "thumbnailUrl": e.get("thumbnail").and_then(|t| t.get("url")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let attachments: Vec<Value> = value
        .get("attachments")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|a| {
                    json!({
                        "url": a.get("url"),
                        "filename": a.get("filename"),
                        "size": a.get("size").cloned().unwrap_or(json!(0)),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "id": value.get("id"),
        "channelId": value.get("channel_id"),
        "author": {
            "id": author.get("id"),
            "username": author.get("username"),
            "avatarUrl": author.get("avatar_url"),
            "isBot": author.get("bot").cloned().unwrap_or(json!(false)),
            "isApp": author.get("bot").cloned().unwrap_or(json!(false)),
        },
        "content": value.get("content").cloned().unwrap_or(json!("")),
        "timestamp": value.get("timestamp").cloned().unwrap_or(json!("1970-01-01T00:00:00Z")),
        "embeds": embeds,
        "attachments": attachments,
        "interactionId": value.get("interaction").and_then(|i| i.get("id")),
        "startedThread": value.get("thread").map(|t| json!({
            "threadId": t.get("id"),
            "name": t.get("name"),
        })),
    })
}

/// The bot-credential REST client.
pub struct HttpControlClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpControlClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn get(&self, path: &str) -> TransportResult<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        check_json(response).await
    }

    async fn post(&self, path: &str, body: Value) -> TransportResult<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth())
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        check_json(response).await
    }

    async fn patch(&self, path: &str, body: Value) -> TransportResult<Value> {
        let response = self
            .http
            .patch(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth())
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        check_json(response).await
    }

    async fn put(&self, path: &str) -> TransportResult<Value> {
        let response = self
            .http
            .put(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth())
            .header("Content-Length", "0")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        check_json(response).await
    }
}

#[async_trait]
impl ControlClient for HttpControlClient {
    async fn fetch_channels(&self, mirror_server_id: &str) -> TransportResult<Vec<MirrorChannel>> {
        let body = self.get(&format!("/guilds/{mirror_server_id}/channels")).await?;
        Ok(body
            .as_array()
            .map(|list| list.iter().map(parse_mirror_channel).collect())
            .unwrap_or_default())
    }

    async fn fetch_roles(&self, mirror_server_id: &str) -> TransportResult<Vec<MirrorRole>> {
        let body = self.get(&format!("/guilds/{mirror_server_id}/roles")).await?;
        Ok(body
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|r| MirrorRole {
                        id: str_field(r, "id"),
                        name: str_field(r, "name"),
                        permissions: str_field(r, "permissions").parse().unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_channel(
        &self,
        mirror_server_id: &str,
        request: CreateChannelRequest,
    ) -> TransportResult<MirrorChannel> {
        let mut body = json!({
            "name": request.name,
            "type": u8::from(request.kind),
        });
        if let Some(parent) = &request.parent_mirror_id {
            body["parent_id"] = json!(parent);
        }
        if let Some(topic) = &request.topic {
            body["topic"] = json!(topic);
        }
        let created = self
            .post(&format!("/guilds/{mirror_server_id}/channels"), body)
            .await?;
        Ok(parse_mirror_channel(&created))
    }

    async fn create_role(
        &self,
        mirror_server_id: &str,
        request: CreateRoleRequest,
    ) -> TransportResult<MirrorRole> {
        let created = self
            .post(
                &format!("/guilds/{mirror_server_id}/roles"),
                json!({
                    "name": request.name,
                    "permissions": request.permissions.to_string(),
                    "mentionable": request.mentionable,
                }),
            )
            .await?;
        Ok(MirrorRole {
            id: str_field(&created, "id"),
            name: str_field(&created, "name"),
            permissions: str_field(&created, "permissions").parse().unwrap_or(0),
        })
    }

    async fn update_role(
        &self,
        mirror_server_id: &str,
        mirror_role_id: &str,
        request: CreateRoleRequest,
    ) -> TransportResult<()> {
        self.patch(
            &format!("/guilds/{mirror_server_id}/roles/{mirror_role_id}"),
            json!({
                "name": request.name,
                "permissions": request.permissions.to_string(),
                "mentionable": request.mentionable,
            }),
        )
        .await?;
        Ok(())
    }

    async fn create_webhook(
        &self,
        mirror_channel_id: &str,
        name: &str,
    ) -> TransportResult<EndpointHandle> {
        let created = self
            .post(
                &format!("/channels/{mirror_channel_id}/webhooks"),
                json!({ "name": name }),
            )
            .await?;
        Ok(EndpointHandle {
            id: str_field(&created, "id"),
            secret: str_field(&created, "token"),
        })
    }

    async fn create_forum_post(
        &self,
        mirror_forum_id: &str,
        request: ForumPostRequest,
    ) -> TransportResult<MirrorChannel> {
        let created = self
            .post(
                &format!("/channels/{mirror_forum_id}/threads"),
                json!({
                    "name": request.title,
                    "auto_archive_duration": request.auto_archive_minutes,
                    "applied_tags": request.available_tags,
                    "message": { "content": request.initial_content },
                }),
            )
            .await?;
        Ok(parse_mirror_channel(&created))
    }

    async fn start_thread_from_message(
        &self,
        mirror_channel_id: &str,
        mirror_message_id: &str,
        name: &str,
    ) -> TransportResult<MirrorChannel> {
        let created = self
            .post(
                &format!("/channels/{mirror_channel_id}/messages/{mirror_message_id}/threads"),
                json!({
                    "name": name,
                    "auto_archive_duration": DEFAULT_AUTO_ARCHIVE_MINUTES,
                }),
            )
            .await?;
        Ok(parse_mirror_channel(&created))
    }

    async fn start_thread(
        &self,
        mirror_channel_id: &str,
        name: &str,
    ) -> TransportResult<MirrorChannel> {
        let created = self
            .post(
                &format!("/channels/{mirror_channel_id}/threads"),
                json!({
                    "name": name,
                    "auto_archive_duration": DEFAULT_AUTO_ARCHIVE_MINUTES,
                    "type": u8::from(ChannelKind::PublicThread),
                }),
            )
            .await?;
        Ok(parse_mirror_channel(&created))
    }

    async fn channel_exists(&self, mirror_channel_id: &str) -> TransportResult<bool> {
        match self.get(&format!("/channels/{mirror_channel_id}")).await {
            Ok(_) => Ok(true),
            Err(MirrorError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn add_reaction(
        &self,
        mirror_channel_id: &str,
        mirror_message_id: &str,
        emoji: &str,
    ) -> TransportResult<()> {
        let encoded = urlencoding::encode(emoji);
        self.put(&format!(
            "/channels/{mirror_channel_id}/messages/{mirror_message_id}/reactions/{encoded}/@me"
        ))
        .await?;
        Ok(())
    }

    async fn fetch_emojis(&self, mirror_server_id: &str) -> TransportResult<Vec<MirrorEmoji>> {
        let body = self.get(&format!("/guilds/{mirror_server_id}/emojis")).await?;
        Ok(body
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|e| MirrorEmoji {
                        id: str_field(e, "id"),
                        name: str_field(e, "name"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn post_message(
        &self,
        mirror_channel_id: &str,
        content: Option<String>,
        embed: Option<Embed>,
    ) -> TransportResult<String> {
        let mut body = json!({});
        if let Some(content) = content {
            body["content"] = json!(content);
        }
        if let Some(embed) = embed {
            body["embeds"] = json!([embed_to_wire(&embed)]);
        }
        let created = self
            .post(&format!("/channels/{mirror_channel_id}/messages"), body)
            .await?;
        Ok(str_field(&created, "id"))
    }
}

/// The user-session REST client.
pub struct HttpObservationClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpObservationClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    async fn get(&self, path: &str) -> TransportResult<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", self.token.clone())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        check_json(response).await
    }

    fn parse_members(body: &Value) -> Vec<SourceMember> {
        body.as_array()
            .map(|list| {
                list.iter()
                    .map(|m| {
                        let user = m.get("user").cloned().unwrap_or_else(|| m.clone());
                        SourceMember {
                            user_id: str_field(&user, "id"),
                            username: str_field(&user, "username"),
                            is_bot: user.get("bot").and_then(Value::as_bool).unwrap_or(false),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObservationClient for HttpObservationClient {
    async fn fetch_guild_channels(
        &self,
        source_server_id: &str,
    ) -> TransportResult<Vec<SourceChannel>> {
        let body = self.get(&format!("/guilds/{source_server_id}/channels")).await?;
        Ok(body
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|c| parse_source_channel(c, source_server_id))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_guild_roles(&self, source_server_id: &str) -> TransportResult<Vec<SourceRole>> {
        let body = self.get(&format!("/guilds/{source_server_id}/roles")).await?;
        Ok(body
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|r| {
                        let id = str_field(r, "id");
                        SourceRole {
                            // The everyone role shares its id with the guild.
                            is_everyone: id == source_server_id,
                            id,
                            server_id: source_server_id.to_string(),
                            name: str_field(r, "name"),
                            permissions: str_field(r, "permissions"),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_guild_member_count(&self, source_server_id: &str) -> TransportResult<u64> {
        let body = self
            .get(&format!("/guilds/{source_server_id}?with_counts=true"))
            .await?;
        Ok(body
            .get("approximate_member_count")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn fetch_guild_members(
        &self,
        source_server_id: &str,
        limit: u32,
        query: Option<&str>,
    ) -> TransportResult<Vec<SourceMember>> {
        let path = match query {
            Some(q) => format!(
                "/guilds/{source_server_id}/members/search?query={}&limit={limit}",
                urlencoding::encode(q)
            ),
            None => format!("/guilds/{source_server_id}/members?limit={limit}"),
        };
        let body = self.get(&path).await?;
        Ok(Self::parse_members(&body))
    }

    async fn request_all_members(
        &self,
        source_server_id: &str,
    ) -> TransportResult<Vec<SourceMember>> {
        // REST approximation of the gateway bulk fetch: page through the
        // member list until a short page arrives.
        let mut all = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let path = match &after {
                Some(a) => format!("/guilds/{source_server_id}/members?limit=1000&after={a}"),
                None => format!("/guilds/{source_server_id}/members?limit=1000"),
            };
            let body = self.get(&path).await?;
            let page = Self::parse_members(&body);
            let short = page.len() < 1000;
            after = page.last().map(|m| m.user_id.clone());
            all.extend(page);
            if short || after.is_none() {
                break;
            }
        }
        Ok(all)
    }

    async fn fetch_thread_by_id(
        &self,
        thread_id: &str,
    ) -> TransportResult<Option<SourceChannel>> {
        match self.get(&format!("/channels/{thread_id}")).await {
            Ok(body) => Ok(Some(parse_source_channel(&body, ""))),
            Err(MirrorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<&str>,
        after: Option<&str>,
    ) -> TransportResult<Vec<SourceMessage>> {
        let mut path = format!("/channels/{channel_id}/messages?limit={limit}");
        if let Some(before) = before {
            path.push_str(&format!("&before={before}"));
        }
        if let Some(after) = after {
            path.push_str(&format!("&after={after}"));
        }
        let body = self.get(&path).await?;
        Ok(body
            .as_array()
            .map(|list| list.iter().map(parse_source_message).collect())
            .unwrap_or_default())
    }

    async fn test_channel_access(&self, channel_id: &str) -> TransportResult<ChannelAccess> {
        match self
            .get(&format!("/channels/{channel_id}/messages?limit=1"))
            .await
        {
            Ok(_) => Ok(ChannelAccess::Accessible),
            Err(MirrorError::AccessDenied(_)) => Ok(ChannelAccess::Denied),
            Err(MirrorError::NotFound(_)) => Ok(ChannelAccess::Missing),
            Err(e) => Err(e),
        }
    }
}

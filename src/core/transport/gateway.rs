// src/core/transport/gateway.rs

//! The shipped event feed: a poller over the observation client.
//!
//! A live gateway session is an external collaborator; this source keeps
//! the pipeline fed without one by cycling through the scraped channels at
//! the configured scrape delay. New messages become `MessageCreated`
//! events; a known message whose embed list grew becomes `MessageUpdated`,
//! which is how late link embeds reach the buffer gate.

use super::ObservationClient;
use crate::core::events::{EventSource, SourceEvent, SourceMessageUpdate};
use crate::core::limiter::RateLimiter;
use crate::core::store::SharedStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Messages fetched per channel poll.
const POLL_FETCH_LIMIT: u32 = 20;

/// Per-channel memory of recently seen messages, for edit detection.
const RECENT_WINDOW: usize = 100;

/// How often the scraped-channel list is re-read from the store.
const CHANNEL_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

pub struct PollingEventSource {
    observation: Arc<dyn ObservationClient>,
    store: SharedStore,
    limiter: Arc<RateLimiter>,
    source_server_id: String,
    scrape_delay: Duration,
    cancel: CancellationToken,

    queue: VecDeque<SourceEvent>,
    /// channel id -> (message id, embed count) ring of recent sightings.
    recent: HashMap<String, VecDeque<(String, usize)>>,
    /// Channels that have completed their silent first poll.
    primed: HashSet<String>,
    channels: Vec<String>,
    next_channel: usize,
    channels_refreshed_at: Option<Instant>,
}

impl PollingEventSource {
    pub fn new(
        observation: Arc<dyn ObservationClient>,
        store: SharedStore,
        limiter: Arc<RateLimiter>,
        source_server_id: impl Into<String>,
        scrape_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            observation,
            store,
            limiter,
            source_server_id: source_server_id.into(),
            scrape_delay,
            cancel,
            queue: VecDeque::new(),
            recent: HashMap::new(),
            primed: HashSet::new(),
            channels: Vec::new(),
            next_channel: 0,
            channels_refreshed_at: None,
        }
    }

    async fn refresh_channels(&mut self) {
        let stale = match self.channels_refreshed_at {
            Some(at) => at.elapsed() >= CHANNEL_REFRESH_INTERVAL,
            None => true,
        };
        if !stale {
            return;
        }
        match self
            .store
            .list_scraped_channels(&self.source_server_id)
            .await
        {
            Ok(list) => {
                self.channels = list
                    .into_iter()
                    .filter(|c| c.kind.is_replication_target() && !c.blacklisted)
                    .map(|c| c.source_channel_id)
                    .collect();
                self.channels_refreshed_at = Some(Instant::now());
            }
            Err(e) => warn!(error = %e, "failed to refresh scraped channel list"),
        }
    }

    /// Polls one channel and enqueues whatever changed since last time.
    async fn poll_channel(&mut self, channel_id: String) {
        self.limiter.wait_for_request(&channel_id).await;
        self.limiter.record_request(&channel_id);

        let mut messages = match self
            .observation
            .fetch_channel_messages(&channel_id, POLL_FETCH_LIMIT, None, None)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                debug!(channel = %channel_id, error = %e, "channel poll failed");
                return;
            }
        };
        // The provider returns newest first; replay oldest first.
        messages.reverse();

        let priming = !self.primed.contains(&channel_id);
        let mut new_events = Vec::new();
        {
            let recent = self.recent.entry(channel_id.clone()).or_default();
            for message in messages {
                if message.id.is_empty() {
                    continue;
                }
                match recent.iter_mut().find(|(id, _)| *id == message.id) {
                    Some((_, seen_embeds)) => {
                        if message.embeds.len() > *seen_embeds {
                            *seen_embeds = message.embeds.len();
                            new_events.push(SourceEvent::MessageUpdated(SourceMessageUpdate {
                                id: message.id.clone(),
                                channel_id: channel_id.clone(),
                                content: Some(message.content.clone()),
                                embeds: message.embeds.clone(),
                            }));
                        }
                    }
                    None => {
                        if recent.len() >= RECENT_WINDOW {
                            recent.pop_front();
                        }
                        recent.push_back((message.id.clone(), message.embeds.len()));
                        // The first poll of a channel only primes the
                        // window, so a restart does not replay history.
                        if !priming {
                            new_events.push(SourceEvent::MessageCreated(message));
                        }
                    }
                }
            }
        }
        self.queue.extend(new_events);
        self.primed.insert(channel_id);
    }

    async fn poll_round(&mut self) {
        self.refresh_channels().await;
        if self.channels.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(self.scrape_delay) => {}
                _ = self.cancel.cancelled() => {}
            }
            return;
        }
        if self.next_channel >= self.channels.len() {
            self.next_channel = 0;
        }
        let channel_id = self.channels[self.next_channel].clone();
        self.next_channel += 1;
        self.poll_channel(channel_id).await;
        tokio::select! {
            _ = tokio::time::sleep(self.scrape_delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

#[async_trait]
impl EventSource for PollingEventSource {
    async fn recv(&mut self) -> Option<SourceEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(event);
            }
            if self.cancel.is_cancelled() {
                return None;
            }
            self.poll_round().await;
        }
    }
}

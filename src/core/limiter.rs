// src/core/limiter.rs

//! A sliding-window rate limiter budgeting outbound provider requests.
//!
//! Two windows apply to every request: a global one (50 requests per
//! second across the engine) and a per-source-channel one (5 requests per
//! minute). Callers suspend in `wait_for_request` until both windows have
//! budget, then mark consumption with `record_request`.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Global window: at most 50 requests in any 1-second span.
const GLOBAL_LIMIT: usize = 50;
const GLOBAL_WINDOW: Duration = Duration::from_secs(1);

/// Per-source-channel window: at most 5 requests in any 60-second span.
const CHANNEL_LIMIT: usize = 5;
const CHANNEL_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    global: Mutex<VecDeque<Instant>>,
    per_channel: DashMap<String, Mutex<VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            global: Mutex::new(VecDeque::new()),
            per_channel: DashMap::new(),
        }
    }

    /// Suspends until both the global and the channel window have budget.
    /// Does not consume budget; callers pair this with `record_request`
    /// immediately before issuing the request.
    pub async fn wait_for_request(&self, channel_id: &str) {
        loop {
            let now = Instant::now();
            let wait = self.required_wait(channel_id, now);
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Records one request against both windows.
    pub fn record_request(&self, channel_id: &str) {
        let now = Instant::now();
        self.global.lock().push_back(now);
        self.per_channel
            .entry(channel_id.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()))
            .lock()
            .push_back(now);
    }

    /// How long the caller must wait before both windows admit a request,
    /// or `None` if budget is available now.
    fn required_wait(&self, channel_id: &str, now: Instant) -> Option<Duration> {
        let mut wait: Option<Duration> = None;

        {
            let mut global = self.global.lock();
            Self::trim(&mut global, now, GLOBAL_WINDOW);
            if global.len() >= GLOBAL_LIMIT {
                let head = global[0];
                wait = Some(GLOBAL_WINDOW.saturating_sub(now.duration_since(head)));
            }
        }

        if let Some(bucket) = self.per_channel.get(channel_id) {
            let mut deque = bucket.lock();
            Self::trim(&mut deque, now, CHANNEL_WINDOW);
            if deque.len() >= CHANNEL_LIMIT {
                let head = deque[0];
                let channel_wait = CHANNEL_WINDOW.saturating_sub(now.duration_since(head));
                wait = Some(match wait {
                    Some(w) => w.max(channel_wait),
                    None => channel_wait,
                });
            }
        }

        // A zero wait can fall out of saturating arithmetic right at the
        // window edge; report availability instead of a busy loop.
        match wait {
            Some(d) if d.is_zero() => Some(Duration::from_millis(10)),
            other => other,
        }
    }

    fn trim(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = deque.front() {
            if now.duration_since(*front) >= window {
                deque.pop_front();
            } else {
                break;
            }
        }
    }

    /// Remaining budget in the channel window, for diagnostics.
    pub fn channel_budget(&self, channel_id: &str) -> usize {
        let now = Instant::now();
        match self.per_channel.get(channel_id) {
            Some(bucket) => {
                let mut deque = bucket.lock();
                Self::trim(&mut deque, now, CHANNEL_WINDOW);
                CHANNEL_LIMIT.saturating_sub(deque.len())
            }
            None => CHANNEL_LIMIT,
        }
    }

    /// Housekeeping: drops channel buckets whose window is fully drained.
    /// Run every 60 s by the janitor so idle channels do not accumulate.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.per_channel.retain(|_, bucket| {
            let mut deque = bucket.lock();
            Self::trim(&mut deque, now, CHANNEL_WINDOW);
            !deque.is_empty()
        });
    }

    /// Number of live per-channel buckets, for diagnostics.
    pub fn bucket_count(&self) -> usize {
        self.per_channel.len()
    }
}

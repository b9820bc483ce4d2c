// src/core/members/detector.rs

//! The member detector: four methods composed in sequence, accumulating a
//! unique-by-user set.
//!
//! Order matters: the cheap methods run first and the expensive
//! alphabetic search only contributes whatever the others missed. Each
//! method reports its raw yield and its newly-contributed count so the
//! census log shows where coverage actually comes from.

use crate::core::events::SourceMember;
use crate::core::state::EngineState;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Page size for the scrolling and search methods.
const PAGE_LIMIT: u32 = 100;

/// Prefixes walked by the brute-force search.
const SEARCH_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

/// One method's contribution to a detection run.
#[derive(Debug, Clone)]
pub struct MethodYield {
    pub method: &'static str,
    pub found: usize,
    pub newly_contributed: usize,
}

/// The outcome of one full detection run.
#[derive(Debug, Default)]
pub struct DetectionReport {
    pub members: Vec<SourceMember>,
    pub yields: Vec<MethodYield>,
}

impl DetectionReport {
    pub fn unique_count(&self) -> usize {
        self.members.len()
    }
}

/// Accumulates members across runs; the cache is itself the first
/// detection method of the next run.
#[derive(Default)]
pub struct MemberDetector {
    cache: HashMap<String, SourceMember>,
}

impl MemberDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Runs all four methods in sequence against the state's source
    /// server. Individual method failures degrade to a zero yield; the
    /// run itself never fails.
    pub async fn detect(&mut self, state: &Arc<EngineState>) -> DetectionReport {
        let mut seen: HashMap<String, SourceMember> = HashMap::new();
        let mut yields = Vec::new();

        // Method 1: whatever earlier runs already know.
        let cached: Vec<SourceMember> = self.cache.values().cloned().collect();
        yields.push(accumulate("cache", cached, &mut seen));

        // Method 2: lazy member-list scrolling.
        let scrolled = match state
            .observation
            .fetch_guild_members(&state.pair.source_server_id, PAGE_LIMIT, None)
            .await
        {
            Ok(members) => members,
            Err(e) => {
                debug!(error = %e, "lazy-list scroll failed");
                Vec::new()
            }
        };
        yields.push(accumulate("lazy-list", scrolled, &mut seen));

        // Method 3: bulk fetch.
        let bulk = match state
            .observation
            .request_all_members(&state.pair.source_server_id)
            .await
        {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "bulk member fetch failed");
                Vec::new()
            }
        };
        yields.push(accumulate("chunk", bulk, &mut seen));

        // Method 4: alphabetic brute-force search, serial on purpose; the
        // rate limiter paces it.
        let mut searched = Vec::new();
        for prefix in SEARCH_ALPHABET.chars() {
            state
                .limiter
                .wait_for_request(&state.pair.source_server_id)
                .await;
            state.limiter.record_request(&state.pair.source_server_id);
            match state
                .observation
                .fetch_guild_members(
                    &state.pair.source_server_id,
                    PAGE_LIMIT,
                    Some(&prefix.to_string()),
                )
                .await
            {
                Ok(members) => searched.extend(members),
                Err(e) => debug!(prefix = %prefix, error = %e, "search page failed"),
            }
        }
        yields.push(accumulate("search", searched, &mut seen));

        self.cache = seen.clone();
        DetectionReport {
            members: seen.into_values().collect(),
            yields,
        }
    }
}

fn accumulate(
    method: &'static str,
    found: Vec<SourceMember>,
    seen: &mut HashMap<String, SourceMember>,
) -> MethodYield {
    let found_count = found.len();
    let mut newly = 0usize;
    for member in found {
        if member.user_id.is_empty() {
            continue;
        }
        if !seen.contains_key(&member.user_id) {
            newly += 1;
        }
        seen.insert(member.user_id.clone(), member);
    }
    MethodYield {
        method,
        found: found_count,
        newly_contributed: newly,
    }
}

// src/core/ttl_cache.rs

//! A uniformly-shaped bounded cache with explicit TTL eviction.
//!
//! The engine needs several small duplicate-suppression tables: keys
//! currently under recovery, channels that permanently failed this session,
//! pending command invocations, throttled error signatures, recently
//! recovered channels. Giving them all one shape keeps the eviction logic
//! in a single place.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct TtlEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// A bounded map whose entries expire `ttl` after insertion. Expired
/// entries are dropped lazily on access and eagerly by `sweep`. When the
/// capacity bound is hit, the oldest entry is evicted first.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, TtlEntry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Inserts a value, replacing any live entry for the same key and
    /// restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // Evict the oldest entry to stay within the bound.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            TtlEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Returns a clone of the live value for `key`, dropping it if expired.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Inserts only if no live entry exists; returns whether the insert
    /// happened. The check-and-set runs under one lock acquisition, so two
    /// racing callers cannot both claim the key.
    pub fn try_insert(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return false;
            }
        }
        entries.insert(
            key,
            TtlEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        true
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.lock().remove(key).map(|e| e.value)
    }

    /// Mutates the live value for `key` in place, or inserts the value
    /// produced by `default`.
    pub fn update_or_insert<F, D>(&self, key: K, update: F, default: D)
    where
        F: FnOnce(&mut V),
        D: FnOnce() -> V,
    {
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => update(&mut entry.value),
            _ => {
                entries.insert(
                    key,
                    TtlEntry {
                        value: default(),
                        inserted_at: Instant::now(),
                    },
                );
            }
        }
    }

    /// Drops all expired entries. Called from the janitor's housekeeping
    /// tick; correctness does not depend on it.
    pub fn sweep(&self) {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

//! In-process cache tier

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::cache::{CacheBackend, CacheError};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
    last_accessed: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct LocalState {
    entries: FxHashMap<String, Entry>,
    tick: u64,
}

impl LocalState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Bounded TTL map with least-recently-used eviction.
#[derive(Debug, Clone)]
pub struct LocalCache {
    capacity: usize,
    state: Arc<Mutex<LocalState>>,
}

impl LocalCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(LocalState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a live entry, refreshing its recency.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut state = self.state();
        let tick = state.next_tick();

        let expired = match state.entries.get_mut(key) {
            None => return None,
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.last_accessed = tick;
                return Some(entry.value.clone());
            }
        };

        if expired {
            state.entries.remove(key);
        }

        None
    }

    pub fn set_value(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut state = self.state();
        let tick = state.next_tick();

        if !state.entries.contains_key(key) && state.entries.len() >= self.capacity {
            state.evict_expired(now);

            while state.entries.len() >= self.capacity {
                state.evict_lru();
            }
        }

        state.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                last_accessed: tick,
            },
        );
    }

    /// Remove every key matching a `*`/`?` glob; returns how many were removed.
    pub fn remove_matching(&self, pattern: &str) -> u64 {
        let mut state = self.state();
        let before = state.entries.len();

        state.entries.retain(|key, _| !glob_match(pattern, key));

        (before - state.entries.len()) as u64
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.get_value(key))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        Ok(keys.iter().map(|key| self.get_value(key)).collect())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.set_value(key, value.to_string(), ttl);

        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), CacheError> {
        for (key, value) in entries {
            self.set_value(key, value.clone(), ttl);
        }

        Ok(())
    }

    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        Ok(self.remove_matching(pattern))
    }
}

/// Redis-style glob match supporting `*` and `?`.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || text.get(t) == Some(&c) => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern.get(p..).is_some_and(|rest| rest.iter().all(|&c| c == '*'))
}

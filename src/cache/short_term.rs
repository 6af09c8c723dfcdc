//! Bounded in-memory cache with per-entry expiry
//!
//! Shields the upstream API from bursts of identical requests issued by the
//! same process. Entries live until their TTL passes on the injected clock or
//! until the cache is full and they are the least recently used.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::clock::Clock;

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
    last_used: u64,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Monotonic access counter, gives a total LRU order
    tick: u64,
}

/// Time- and size-bounded cache keyed by request
///
/// Eviction: expired entries are dropped first; if the cache is still full
/// the entry with the oldest access is evicted.
pub struct ShortTermCache<K, V> {
    capacity: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<State<K, V>>,
    /// One async lock per key currently being computed
    inflight: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K, V> ShortTermCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            clock,
            state: Mutex::new(State {
                entries: HashMap::new(),
                tick: 0,
            }),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a live entry, dropping it if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.tick += 1;
        let tick = state.tick;

        let expired = match state.entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.last_used = tick;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.remove(key);
        }
        None
    }

    /// Stores a value for `ttl`, evicting if the cache is full
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut state = self.lock_state();
        state.tick += 1;
        let tick = state.tick;

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            state.entries.retain(|_, entry| now < entry.expires_at);
            if state.entries.len() >= self.capacity {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    state.entries.remove(&oldest);
                    debug!("short-term cache full, evicted least recently used entry");
                }
            }
        }

        state.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                last_used: tick,
            },
        );
    }

    /// Removes every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| now < entry.expires_at);
        before - state.entries.len()
    }

    pub fn clear(&self) {
        self.lock_state().entries.clear();
    }

    /// Returns the cached value for `key` or computes and stores it
    ///
    /// Concurrent callers for the same key wait for the first computation
    /// instead of starting their own. Errors are returned to the caller and
    /// never stored, so the next call retries.
    pub async fn get_or_try_compute<F, Fut, E>(&self, key: K, ttl: Duration, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let gate = self.gate(&key);
        let guard = gate.lock().await;

        // Another caller may have filled the entry while we waited
        let result = match self.get(&key) {
            Some(value) => Ok(value),
            None => {
                let result = compute().await;
                if let Ok(value) = &result {
                    self.insert(key.clone(), value.clone(), ttl);
                }
                result
            }
        };

        drop(guard);
        self.release(&key, &gate);
        result
    }

    fn gate(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release(&self, key: &K, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this caller hold the gate: nobody is waiting on it
        if Arc::strong_count(gate) <= 2 {
            inflight.remove(key);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

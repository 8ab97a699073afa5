//! # TTL Cache
//!
//! Process-local key/value store with per-entry expiry and an optional
//! least-recently-used capacity bound.
//!
//! Expiry is lazy: an expired entry is never returned, and is purged by the read
//! that discovers it. `purge_expired()` exists for callers that want to sweep
//! explicitly, but nothing requires it.
//!
//! With `max_entries` set, inserting a new key into a full cache evicts the least
//! recently used entry (reads and writes both count as use). Under memory
//! pressure a live entry can therefore disappear before its TTL.
//!
//! Every write is stamped with a cache-wide sequence number. A caller that fills
//! the cache after an await takes `write_version()` first and stores through
//! `set_if_unchanged`, which refuses to overwrite a key written or removed in
//! the meantime.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A stored value and its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    /// `None` means the entry never expires by time
    pub expires_at: Option<Instant>,
    access_tick: u64,
    version: u64,
}

impl<V> CacheEntry<V> {
    /// Whether the entry is past its expiry at `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Observability snapshot for a cache instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub name: String,
    pub size: usize,
    pub max_entries: Option<usize>,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub expired_count: u64,
    pub hit_rate: f64,
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// access tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    /// Last write sequence handed out
    write_seq: u64,
    /// Sequence of the most recent removal of any key
    removal_seq: u64,
}

impl<V> CacheInner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            write_seq: 0,
            removal_seq: 0,
        }
    }

    fn next_write(&mut self) -> u64 {
        self.write_seq += 1;
        self.write_seq
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn detach(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.access_tick);
        Some(entry)
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.detach(key)?;
        self.removal_seq = self.next_write();
        Some(entry)
    }

    fn touch(&mut self, key: &str) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.access_tick);
            entry.access_tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn insert(&mut self, key: &str, mut entry: CacheEntry<V>) {
        self.detach(key);
        let tick = self.tick();
        entry.access_tick = tick;
        entry.version = self.next_write();
        self.recency.insert(tick, key.to_string());
        self.entries.insert(key.to_string(), entry);
    }

    fn pop_least_recent(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        self.removal_seq = self.next_write();
        Some(key)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// Generic TTL cache, safe to share across tasks
#[derive(Debug)]
pub struct TtlCache<V> {
    name: String,
    max_entries: Option<usize>,
    inner: Mutex<CacheInner<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    /// Create an unbounded cache
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, None)
    }

    /// Create a cache with an optional LRU capacity bound
    pub fn with_capacity(name: impl Into<String>, max_entries: Option<usize>) -> Self {
        Self {
            name: name.into(),
            max_entries: max_entries.filter(|max| *max > 0),
            inner: Mutex::new(CacheInner::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a live value, purging the entry if it has expired
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            inner.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        inner.touch(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store a value, replacing any existing entry.
    ///
    /// `ttl = None` stores without time expiry, as does a TTL too large to
    /// represent. A zero TTL is already expired: the key is removed and nothing
    /// is stored.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.lock();
        self.store(&mut inner, key, value, ttl);
    }

    /// Current write sequence, to pass to `set_if_unchanged` later
    pub fn write_version(&self) -> u64 {
        self.inner.lock().write_seq
    }

    /// Store only if `key` has not been written, and no key has been removed,
    /// since `since` was taken from `write_version()`. Returns whether the value
    /// was stored.
    pub fn set_if_unchanged(&self, key: &str, value: V, ttl: Option<Duration>, since: u64) -> bool {
        let mut inner = self.inner.lock();

        let changed = match inner.entries.get(key) {
            Some(entry) => entry.version > since,
            None => inner.removal_seq > since,
        };
        if changed {
            return false;
        }

        self.store(&mut inner, key, value, ttl);
        true
    }

    /// Atomically read-modify-write a value.
    ///
    /// `f` receives the live value (expired entries are treated as absent). A live
    /// entry keeps its original expiry; a new entry gets `ttl`.
    pub fn update<F>(&self, key: &str, ttl: Option<Duration>, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let live = match inner.entries.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                inner.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => Some((entry.created_at, entry.expires_at)),
            None => None,
        };

        let current = inner.entries.get(key).map(|entry| &entry.value);
        let value = f(current);

        let (created_at, expires_at) = match live {
            Some(lifetime) => lifetime,
            None => {
                self.make_room(&mut inner, key, now);
                (now, expiry(now, ttl))
            }
        };

        inner.insert(
            key,
            CacheEntry {
                value: value.clone(),
                created_at,
                expires_at,
                access_tick: 0,
                version: 0,
            },
        );
        value
    }

    /// Remove a key. Returns whether a live entry was removed; absent keys are fine.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .remove(key)
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    /// Whether a live entry exists (expired entries are purged)
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                inner.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Sweep all expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let purged = self.inner.lock().purge_expired(Instant::now());
        self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.removal_seq = inner.next_write();
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let lookups = hit_count + miss_count;

        CacheStats {
            name: self.name.clone(),
            size: self.len(),
            max_entries: self.max_entries,
            hit_count,
            miss_count,
            eviction_count: self.evictions.load(Ordering::Relaxed),
            expired_count: self.expirations.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 {
                hit_count as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    fn store(&self, inner: &mut CacheInner<V>, key: &str, value: V, ttl: Option<Duration>) {
        let now = Instant::now();

        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            inner.remove(key);
            return;
        }

        self.make_room(inner, key, now);
        inner.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                expires_at: expiry(now, ttl),
                access_tick: 0,
                version: 0,
            },
        );
    }

    /// Ensure inserting `key` will not exceed the capacity bound
    fn make_room(&self, inner: &mut CacheInner<V>, key: &str, now: Instant) {
        let Some(max_entries) = self.max_entries else {
            return;
        };
        if inner.entries.contains_key(key) || inner.entries.len() < max_entries {
            return;
        }

        // Expired entries go first so a live entry is only evicted when necessary
        let purged = inner.purge_expired(now);
        self.expirations.fetch_add(purged as u64, Ordering::Relaxed);

        while inner.entries.len() >= max_entries {
            if inner.pop_least_recent().is_none() {
                break;
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Expiry instant for `ttl`; overflow means no expiry
fn expiry(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.and_then(|ttl| now.checked_add(ttl))
}

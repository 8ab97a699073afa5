//! # Resilient Cache Store
//!
//! Remote key-value store client with a local fallback cache.
//!
//! - `get` checks the local cache first, then the remote store; when the remote
//!   store is unavailable the local cache answers (possibly with `None`).
//! - `set` mirrors the value locally before writing remotely, so a value written
//!   by this process stays readable here after the remote store goes down.
//! - `incr` falls back to a local-only counter with its own TTL. Those counts
//!   are process-local and are never reconciled with the remote counter.
//!
//! Values cross the backend boundary as JSON strings.

use crate::cache::{CacheStats, TtlCache};
use crate::config::{CacheSettings, CacheStoreSettings};
use crate::constants::dependencies;
use crate::error::Result;
use crate::logging;
use crate::protected::{ResilientResponse, Sourced};
use crate::resilience::{with_timeout, CircuitState, Fallback, ServiceHealth, ServiceRegistry};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Remote key-value store collaborator
#[async_trait]
pub trait CacheStoreBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()>;

    /// Returns whether a key was removed
    async fn del(&self, key: &str) -> Result<bool>;

    /// Increment and return the counter, applying `ttl_seconds` when it is created
    async fn incr(&self, key: &str, ttl_seconds: Option<u64>) -> Result<i64>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct CacheStoreCounters {
    gets: AtomicU64,
    local_hits: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    increments: AtomicU64,
    fallbacks: AtomicU64,
}

/// Snapshot of cache-store wrapper activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStoreStats {
    pub dependency: String,
    pub gets: u64,
    pub local_hits: u64,
    pub sets: u64,
    pub deletes: u64,
    pub increments: u64,
    pub fallbacks: u64,
    pub local_cache: CacheStats,
    pub local_counters: CacheStats,
    pub breaker_state: Option<CircuitState>,
    pub health: ServiceHealth,
}

/// Cache-store client routed through the service registry
pub struct ResilientCacheStore {
    backend: Arc<dyn CacheStoreBackend>,
    registry: Arc<ServiceRegistry>,
    settings: CacheStoreSettings,
    dependency: String,
    local: TtlCache<String>,
    counters: TtlCache<i64>,
    stats: CacheStoreCounters,
}

impl std::fmt::Debug for ResilientCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCacheStore")
            .field("dependency", &self.dependency)
            .field("settings", &self.settings)
            .field("local_entries", &self.local.len())
            .finish()
    }
}

impl ResilientCacheStore {
    pub fn new(
        backend: Arc<dyn CacheStoreBackend>,
        registry: Arc<ServiceRegistry>,
        settings: CacheStoreSettings,
        cache: &CacheSettings,
    ) -> Self {
        Self {
            backend,
            registry,
            settings,
            dependency: dependencies::CACHE_STORE.to_string(),
            local: TtlCache::with_capacity("cache_store.local", cache.capacity()),
            counters: TtlCache::with_capacity("cache_store.counters", cache.capacity()),
            stats: CacheStoreCounters::default(),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Read a JSON value, local cache first
    pub async fn get<T>(&self, key: &str) -> Result<ResilientResponse<Option<T>>>
    where
        T: DeserializeOwned,
    {
        self.stats.gets.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        if let Some(raw) = self.local.get(key) {
            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            let value = serde_json::from_str(&raw)?;
            return Ok(ResilientResponse::from_cache(Some(value), started.elapsed()));
        }

        let local = &self.local;
        let version = local.write_version();
        let (raw, fallback): Sourced<Option<String>> = self
            .registry
            .execute(
                &self.dependency,
                || async {
                    let raw = self.remote("cache_store.get", self.backend.get(key)).await?;
                    Ok((raw, false))
                },
                Some(Fallback::from_fn(move || (local.get(key), true))),
            )
            .await?;

        let value = raw.as_deref().map(serde_json::from_str).transpose()?;
        // A set or del that landed during the remote read wins over this value
        if let (Some(raw), false) = (raw, fallback) {
            local.set_if_unchanged(key, raw, Some(self.settings.local_fallback_ttl()), version);
        }
        Ok(self.respond(value, fallback, "get", started))
    }

    /// Write a JSON value locally and remotely.
    ///
    /// `ttl` applies to both copies; without one the local mirror uses the
    /// configured fallback TTL and the remote value does not expire.
    pub async fn set<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<ResilientResponse<()>>
    where
        T: Serialize + ?Sized,
    {
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let raw = serde_json::to_string(value)?;

        self.local.set(
            key,
            raw.clone(),
            Some(ttl.unwrap_or_else(|| self.settings.local_fallback_ttl())),
        );

        let ttl_seconds = ttl.map(|ttl| ttl.as_secs().max(1));
        let ((), fallback): Sourced<()> = self
            .registry
            .execute(
                &self.dependency,
                || async {
                    self.remote("cache_store.set", self.backend.set(key, &raw, ttl_seconds))
                        .await?;
                    Ok(((), false))
                },
                Some(Fallback::value(((), true))),
            )
            .await?;

        Ok(self.respond((), fallback, "set", started))
    }

    /// Delete a key locally and remotely. Deleting an absent key is fine.
    pub async fn del(&self, key: &str) -> Result<ResilientResponse<bool>> {
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let removed_locally = self.local.delete(key);

        let (removed, fallback): Sourced<bool> = self
            .registry
            .execute(
                &self.dependency,
                || async {
                    let removed = self.remote("cache_store.del", self.backend.del(key)).await?;
                    Ok((removed || removed_locally, false))
                },
                Some(Fallback::value((removed_locally, true))),
            )
            .await?;

        Ok(self.respond(removed, fallback, "del", started))
    }

    /// Increment a counter; falls back to a local-only counter while the remote
    /// store is unavailable
    pub async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<ResilientResponse<i64>> {
        self.stats.increments.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let counters = &self.counters;
        let counter_ttl = ttl.unwrap_or_else(|| self.settings.counter_fallback_ttl());
        let ttl_seconds = ttl.map(|ttl| ttl.as_secs().max(1));

        let (count, fallback): Sourced<i64> = self
            .registry
            .execute(
                &self.dependency,
                || async {
                    let count = self
                        .remote("cache_store.incr", self.backend.incr(key, ttl_seconds))
                        .await?;
                    Ok((count, false))
                },
                Some(Fallback::from_fn(move || {
                    let count =
                        counters.update(key, Some(counter_ttl), |current| current.copied().unwrap_or(0) + 1);
                    (count, true)
                })),
            )
            .await?;

        Ok(self.respond(count, fallback, "incr", started))
    }

    /// Probe the remote store outside the breaker and correct its state
    pub async fn ping(&self) -> bool {
        match self.remote("cache_store.ping", self.backend.ping()).await {
            Ok(()) => {
                self.registry.mark_healthy(&self.dependency);
                true
            }
            Err(error) => {
                self.registry.mark_unhealthy(&self.dependency, &error);
                false
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.registry.is_available(&self.dependency)
    }

    pub fn stats(&self) -> CacheStoreStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStoreStats {
            dependency: self.dependency.clone(),
            gets: load(&self.stats.gets),
            local_hits: load(&self.stats.local_hits),
            sets: load(&self.stats.sets),
            deletes: load(&self.stats.deletes),
            increments: load(&self.stats.increments),
            fallbacks: load(&self.stats.fallbacks),
            local_cache: self.local.stats(),
            local_counters: self.counters.stats(),
            breaker_state: self
                .registry
                .get_circuit_breaker(&self.dependency)
                .map(|breaker| breaker.state()),
            health: self.registry.health(&self.dependency),
        }
    }

    async fn remote<T>(
        &self,
        operation: &str,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        with_timeout(operation, self.settings.operation_timeout(), call).await
    }

    fn respond<T>(
        &self,
        value: T,
        fallback: bool,
        operation: &str,
        started: Instant,
    ) -> ResilientResponse<T> {
        let elapsed = started.elapsed();
        if fallback {
            self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
            logging::log_fallback(&self.dependency, operation, "remote store unavailable");
            ResilientResponse::from_fallback(value, elapsed)
        } else {
            debug!(dependency = %self.dependency, operation = operation, "Remote store call succeeded");
            ResilientResponse::fresh(value, elapsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResilienceError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
        counters: Mutex<HashMap<String, i64>>,
        down: AtomicBool,
    }

    impl MemoryStore {
        fn check(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(ResilienceError::connection("redis", "connection refused"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheStoreBackend for MemoryStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.check()?;
            Ok(self.values.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str, _ttl_seconds: Option<u64>) -> Result<()> {
            self.check()?;
            self.values.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn del(&self, key: &str) -> Result<bool> {
            self.check()?;
            Ok(self.values.lock().remove(key).is_some())
        }

        async fn incr(&self, key: &str, _ttl_seconds: Option<u64>) -> Result<i64> {
            self.check()?;
            let mut counters = self.counters.lock();
            let count = counters.entry(key.to_string()).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn ping(&self) -> Result<()> {
            self.check()
        }
    }

    fn store() -> (Arc<MemoryStore>, ResilientCacheStore) {
        let backend = Arc::new(MemoryStore::default());
        let registry = Arc::new(ServiceRegistry::default().without_listener());
        let client = ResilientCacheStore::new(
            backend.clone(),
            registry,
            CacheStoreSettings::default(),
            &CacheSettings::default(),
        );
        (backend, client)
    }

    #[tokio::test]
    async fn test_set_then_get_is_served_locally() {
        let (backend, client) = store();
        client.set("user:1", &serde_json::json!({"name": "ada"}), None).await.unwrap();
        assert!(backend.values.lock().contains_key("user:1"));

        let response = client.get::<serde_json::Value>("user:1").await.unwrap();
        assert!(response.cached);
        assert_eq!(response.value.unwrap()["name"], "ada");
    }

    #[tokio::test]
    async fn test_remote_read_populates_local_cache() {
        let (backend, client) = store();
        backend
            .values
            .lock()
            .insert("greeting".to_string(), "\"hello\"".to_string());

        let first = client.get::<String>("greeting").await.unwrap();
        assert!(first.is_authoritative());
        assert_eq!(first.value.as_deref(), Some("hello"));

        let second = client.get::<String>("greeting").await.unwrap();
        assert!(second.cached);
    }

    #[tokio::test]
    async fn test_outage_after_write_still_serves_value() {
        let (backend, client) = store();
        client.set("config", &42u32, None).await.unwrap();
        backend.down.store(true, Ordering::SeqCst);

        let response = client.get::<u32>("config").await.unwrap();
        assert_eq!(response.value, Some(42));
    }

    #[tokio::test]
    async fn test_outage_miss_is_flagged_fallback() {
        let (backend, client) = store();
        backend.down.store(true, Ordering::SeqCst);

        let response = client.get::<u32>("missing").await.unwrap();
        assert!(response.fallback);
        assert_eq!(response.value, None);
        assert_eq!(client.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_del_absent_key_is_idempotent() {
        let (_backend, client) = store();
        let before = client.stats().local_cache.size;

        let response = client.del("nothing-here").await.unwrap();
        assert!(!response.value);
        assert_eq!(client.stats().local_cache.size, before);
    }

    #[tokio::test]
    async fn test_corrupt_remote_value_is_an_application_error() {
        let (backend, client) = store();
        backend
            .values
            .lock()
            .insert("broken".to_string(), "{not json".to_string());

        let result = client.get::<u32>("broken").await;
        assert!(matches!(result, Err(ResilienceError::Serialization { .. })));
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_ping_marks_health() {
        let (backend, client) = store();
        backend.down.store(true, Ordering::SeqCst);
        assert!(!client.ping().await);
        assert!(!client.is_available());

        backend.down.store(false, Ordering::SeqCst);
        assert!(client.ping().await);
        assert!(client.is_available());
    }
}

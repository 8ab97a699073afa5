//! In-memory collaborators with failure injection

use async_trait::async_trait;
use parking_lot::Mutex;
use resilience_core::protected::{AiBackend, AiCompletion, AiRequest, CacheStoreBackend};
use resilience_core::{ResilienceError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Remote key-value store that can be switched off
#[derive(Debug, Default)]
pub struct MockCacheStore {
    values: Mutex<HashMap<String, String>>,
    counters: Mutex<HashMap<String, i64>>,
    get_delay: Option<Duration>,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl MockCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads take their value first, then answer after `delay`
    pub fn with_get_delay(delay: Duration) -> Self {
        Self {
            get_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Write a raw value straight into the remote store
    pub fn seed(&self, key: &str, raw: &str) {
        self.values.lock().insert(key.to_string(), raw.to_string());
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn counter(&self, key: &str) -> Option<i64> {
        self.counters.lock().get(key).copied()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(ResilienceError::connection("redis", "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStoreBackend for MockCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.enter()?;
        let value = self.values.lock().get(key).cloned();
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, _ttl_seconds: Option<u64>) -> Result<()> {
        self.enter()?;
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.enter()?;
        Ok(self.values.lock().remove(key).is_some())
    }

    async fn incr(&self, key: &str, _ttl_seconds: Option<u64>) -> Result<i64> {
        self.enter()?;
        let mut counters = self.counters.lock();
        let count = counters.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn ping(&self) -> Result<()> {
        self.enter()
    }
}

/// LLM collaborator answering after an optional delay
#[derive(Debug, Default)]
pub struct MockAiBackend {
    delay: Option<Duration>,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl MockAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiBackend for MockAiBackend {
    async fn complete(&self, request: &AiRequest) -> Result<AiCompletion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(ResilienceError::connection("ai-claude", "service unavailable"));
        }
        Ok(AiCompletion {
            content: format!("Answer: {}", request.normalized_query()),
            model: "claude-test".to_string(),
            input_tokens: Some(10),
            output_tokens: Some(20),
        })
    }
}

/// Counts how many times an operation body actually ran
#[derive(Debug, Default)]
pub struct CallCounter(AtomicUsize);

impl CallCounter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

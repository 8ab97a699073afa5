//! # Resilient AI Client
//!
//! Hosted LLM access with response caching and a clearly labeled degraded
//! fallback.
//!
//! Cache keys are content-derived: a SHA-256 over the normalized query, the
//! tier and the sorted context identifiers, so the same question asked with
//! different spacing or casing is served from cache. Fallback responses are
//! never cached, and their text says they are not an AI answer.

use crate::cache::{CacheStats, TtlCache};
use crate::config::{AiSettings, CacheSettings};
use crate::constants::{cache, dependencies};
use crate::error::Result;
use crate::logging;
use crate::protected::Sourced;
use crate::resilience::{with_timeout, CircuitState, Fallback, ServiceHealth, ServiceRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Model name reported on degraded responses
pub const FALLBACK_MODEL: &str = "fallback";

/// Text returned in place of an AI answer while the service is unavailable
pub const FALLBACK_CONTENT: &str = "[Degraded mode] The AI service is temporarily unavailable. \
This is an automated placeholder, not an AI-generated answer. Please try again shortly.";

/// Hosted LLM collaborator
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn complete(&self, request: &AiRequest) -> Result<AiCompletion>;
}

/// Normalized query parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiRequest {
    pub query: String,
    pub tier: String,
    /// Contextual identifiers (user, document, locale) that change the answer
    pub context: BTreeMap<String, String>,
    pub cacheable: bool,
}

impl AiRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tier: "standard".to_string(),
            context: BTreeMap::new(),
            cacheable: true,
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = tier.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Never read from or write to the response cache
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Lowercased, trimmed, with runs of whitespace collapsed
    pub fn normalized_query(&self) -> String {
        self.query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Content-derived cache key.
    ///
    /// Every field is length-prefixed, so no query, tier or context value can
    /// imitate the boundary between two others.
    pub fn cache_key(&self) -> String {
        fn field(hasher: &mut Sha256, bytes: &[u8]) {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        }

        let mut hasher = Sha256::new();
        field(&mut hasher, self.normalized_query().as_bytes());
        field(&mut hasher, self.tier.as_bytes());
        hasher.update((self.context.len() as u64).to_be_bytes());
        for (key, value) in &self.context {
            field(&mut hasher, key.as_bytes());
            field(&mut hasher, value.as_bytes());
        }
        format!("{}{}", cache::AI_KEY_PREFIX, hex::encode(hasher.finalize()))
    }
}

/// What the collaborator returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiCompletion {
    pub content: String,
    pub model: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

impl AiCompletion {
    fn degraded() -> Self {
        Self {
            content: FALLBACK_CONTENT.to_string(),
            model: FALLBACK_MODEL.to_string(),
            input_tokens: None,
            output_tokens: None,
        }
    }
}

/// Caller-facing answer with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub request_id: Uuid,
    pub content: String,
    pub model: String,
    pub cached: bool,
    pub fallback: bool,
    pub latency_ms: u64,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

impl AiResponse {
    fn from_completion(completion: AiCompletion, cached: bool, fallback: bool, started: Instant) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            content: completion.content,
            model: completion.model,
            cached,
            fallback,
            latency_ms: started.elapsed().as_millis() as u64,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        }
    }
}

#[derive(Debug, Default)]
struct AiCounters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    backend_calls: AtomicU64,
    fallbacks: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot of AI wrapper activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiStats {
    pub dependency: String,
    pub requests: u64,
    pub cache_hits: u64,
    pub backend_calls: u64,
    pub fallbacks: u64,
    pub errors: u64,
    pub cache: CacheStats,
    pub breaker_state: Option<CircuitState>,
    pub health: ServiceHealth,
}

/// AI client routed through the service registry
pub struct ResilientAiClient {
    backend: Arc<dyn AiBackend>,
    registry: Arc<ServiceRegistry>,
    settings: AiSettings,
    dependency: String,
    responses: TtlCache<AiCompletion>,
    counters: AiCounters,
}

impl std::fmt::Debug for ResilientAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientAiClient")
            .field("dependency", &self.dependency)
            .field("settings", &self.settings)
            .field("cached_responses", &self.responses.len())
            .finish()
    }
}

impl ResilientAiClient {
    pub fn new(
        backend: Arc<dyn AiBackend>,
        registry: Arc<ServiceRegistry>,
        settings: AiSettings,
        cache: &CacheSettings,
    ) -> Self {
        Self {
            backend,
            registry,
            settings,
            dependency: dependencies::AI.to_string(),
            responses: TtlCache::with_capacity("ai.responses", cache.capacity()),
            counters: AiCounters::default(),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Answer a query: cache, then the backend, then the degraded fallback.
    ///
    /// Application errors from the backend (a rejected prompt, say) are
    /// returned as errors, never replaced by the fallback.
    pub async fn ask(&self, request: &AiRequest) -> Result<AiResponse> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let use_cache = request.cacheable && self.settings.cache_responses;
        let key = use_cache.then(|| request.cache_key());

        if let Some(completion) = key.as_deref().and_then(|key| self.responses.get(key)) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(AiResponse::from_completion(completion, true, false, started));
        }

        let version = self.responses.write_version();
        let result: Result<Sourced<AiCompletion>> = self
            .registry
            .execute(
                &self.dependency,
                || async {
                    self.counters.backend_calls.fetch_add(1, Ordering::Relaxed);
                    let completion = with_timeout(
                        "ai.complete",
                        self.settings.request_timeout(),
                        self.backend.complete(request),
                    )
                    .await?;
                    Ok((completion, false))
                },
                Some(Fallback::from_fn(|| (AiCompletion::degraded(), true))),
            )
            .await;

        let (completion, fallback) = match result {
            Ok(sourced) => sourced,
            Err(error) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                logging::log_error(&self.dependency, "ai.complete", &error.to_string(), None);
                return Err(error);
            }
        };

        if fallback {
            self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            logging::log_fallback(&self.dependency, "ai.complete", "AI service unavailable");
        } else if let Some(key) = &key {
            self.responses.set_if_unchanged(
                key,
                completion.clone(),
                Some(self.settings.response_ttl()),
                version,
            );
        }

        let response = AiResponse::from_completion(completion, false, fallback, started);
        logging::log_dependency_operation(
            &self.dependency,
            "ai.complete",
            if fallback { "fallback" } else { "ok" },
            started.elapsed(),
            Some(response.model.as_str()),
        );
        Ok(response)
    }

    /// Drop a cached answer
    pub fn invalidate(&self, request: &AiRequest) -> bool {
        self.responses.delete(&request.cache_key())
    }

    pub fn is_available(&self) -> bool {
        self.registry.is_available(&self.dependency)
    }

    pub fn stats(&self) -> AiStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        AiStats {
            dependency: self.dependency.clone(),
            requests: load(&self.counters.requests),
            cache_hits: load(&self.counters.cache_hits),
            backend_calls: load(&self.counters.backend_calls),
            fallbacks: load(&self.counters.fallbacks),
            errors: load(&self.counters.errors),
            cache: self.responses.stats(),
            breaker_state: self
                .registry
                .get_circuit_breaker(&self.dependency)
                .map(|breaker| breaker.state()),
            health: self.registry.health(&self.dependency),
        }
    }
}

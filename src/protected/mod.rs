//! # Resilient Dependency Wrappers
//!
//! Dependency-shaped clients (database, remote cache store, hosted AI) that
//! route every real call through the [`ServiceRegistry`](crate::resilience::ServiceRegistry)
//! under a per-call deadline, and layer a local cache for reads or fallbacks.
//!
//! Every successful call returns a [`ResilientResponse`] saying where the value
//! came from, so a fallback is never mistaken for an authoritative answer.

pub mod ai;
pub mod cache_store;
pub mod database;

pub use ai::{AiBackend, AiCompletion, AiRequest, AiResponse, AiStats, ResilientAiClient};
pub use cache_store::{CacheStoreBackend, CacheStoreStats, ResilientCacheStore};
pub use database::{DatabaseOperationKind, DatabaseStats, ResilientDatabase};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result envelope with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilientResponse<T> {
    pub value: T,
    /// Served from the wrapper's local cache without reaching the dependency
    pub cached: bool,
    /// Substitute value served because the dependency was unavailable
    pub fallback: bool,
    pub latency_ms: u64,
}

impl<T> ResilientResponse<T> {
    pub fn fresh(value: T, latency: Duration) -> Self {
        Self::build(value, false, false, latency)
    }

    pub fn from_cache(value: T, latency: Duration) -> Self {
        Self::build(value, true, false, latency)
    }

    pub fn from_fallback(value: T, latency: Duration) -> Self {
        Self::build(value, false, true, latency)
    }

    /// Whether the value came from the dependency itself in this call
    pub fn is_authoritative(&self) -> bool {
        !self.cached && !self.fallback
    }

    fn build(value: T, cached: bool, fallback: bool, latency: Duration) -> Self {
        Self {
            value,
            cached,
            fallback,
            latency_ms: latency.as_millis() as u64,
        }
    }
}

/// Value produced inside a registry call, tagged with whether the fallback made it
pub(crate) type Sourced<T> = (T, bool);

//! # System Constants
//!
//! Dependency names and default timing values shared by the registry, the
//! configuration defaults and the resilient wrappers.

/// Registry names for the protected dependencies
pub mod dependencies {
    /// Relational database
    pub const DATABASE: &str = "database";
    /// Remote key-value cache store
    pub const CACHE_STORE: &str = "redis";
    /// Hosted LLM API
    pub const AI: &str = "ai-claude";

    /// All dependency names known at startup
    pub const ALL: [&str; 3] = [DATABASE, CACHE_STORE, AI];
}

/// Default timeouts, in milliseconds
pub mod timeouts {
    pub const DATABASE_READ_MS: u64 = 5_000;
    pub const DATABASE_WRITE_MS: u64 = 3_000;
    pub const DATABASE_TRANSACTION_MS: u64 = 8_000;
    pub const DATABASE_EXECUTE_MS: u64 = 5_000;
    pub const DATABASE_HEALTH_CHECK_MS: u64 = 2_000;

    pub const CACHE_STORE_OPERATION_MS: u64 = 1_000;

    pub const AI_REQUEST_MS: u64 = 30_000;
}

/// Slow-operation monitoring thresholds, in milliseconds
pub mod latency {
    pub const SLOW_WARNING_MS: u64 = 500;
    pub const SLOW_ERROR_MS: u64 = 2_000;
}

/// Local cache lifetimes and bounds
pub mod cache {
    /// Default capacity of each wrapper-owned local cache
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
    /// Local mirror of cache-store values
    pub const LOCAL_FALLBACK_TTL_SECONDS: u64 = 300;
    /// Local-only counters used while the cache store is unreachable
    pub const COUNTER_FALLBACK_TTL_SECONDS: u64 = 60;
    /// AI response cache lifetime
    pub const AI_RESPONSE_TTL_SECONDS: u64 = 30 * 60;
    /// Key prefix for AI response cache entries
    pub const AI_KEY_PREFIX: &str = "ai:response:";
}

/// Registry health window defaults
pub mod health {
    pub const WINDOW_SECONDS: u64 = 60;
    pub const MIN_SAMPLES: usize = 5;
    pub const DEGRADED_FAILURE_RATE: f64 = 0.2;
    pub const MAX_SERVICES: usize = 50;
}

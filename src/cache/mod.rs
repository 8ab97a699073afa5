//! # Local Cache Module
//!
//! In-process TTL caching used two ways by the resilient wrappers:
//!
//! ```text
//! read path:      TtlCache::get ──hit──> return cached
//!                      └─miss──> registry.execute(...) ──ok──> TtlCache::set
//! fallback path:  breaker open / timeout ──> TtlCache::get (last known value)
//! ```
//!
//! The cache is generic over the value type; JSON (de)serialization happens at
//! the wrapper boundary, never inside the cache.

pub mod ttl_cache;

pub use ttl_cache::{CacheEntry, CacheStats, TtlCache};

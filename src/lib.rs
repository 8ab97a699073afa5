#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resilience Core
//!
//! Fault-tolerance layer between application code and three unreliable
//! dependencies: a relational database, a remote key-value store and a hosted
//! LLM API.
//!
//! ## Overview
//!
//! When a dependency is slow, erroring or unreachable, the application should
//! stay responsive and partially functional instead of cascading the failure
//! through every request. This crate provides the substrate for that:
//!
//! - **Circuit breakers** per named dependency, with single-flight half-open probes
//! - **TTL caches** used both for response caching and as fallback stores
//! - **A service registry** that is the only path from a wrapper to a dependency
//! - **Resilient wrappers** for the database, the cache store and the AI API
//!
//! ## Module Organization
//!
//! - [`cache`] - Generic TTL cache with optional LRU bound
//! - [`resilience`] - Circuit breaker, registry, metrics and deadlines
//! - [`protected`] - Database, cache-store and AI wrappers
//! - [`config`] - Typed configuration and the layered loader
//! - [`error`] - Structured error handling
//! - [`logging`] - Subscriber setup and structured record helpers
//! - [`system_context`] - Composition root
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilience_core::{ResilienceConfig, ResilienceContext, ResilienceError};
//!
//! # async fn example() -> resilience_core::Result<()> {
//! resilience_core::logging::init_structured_logging();
//!
//! let context = ResilienceContext::new(ResilienceConfig::default())?;
//! let database = context.database();
//!
//! let response = database
//!     .read("users.count", || async { Ok::<u64, ResilienceError>(42) })
//!     .await?;
//! assert!(!response.fallback);
//! # Ok(())
//! # }
//! ```
//!
//! Not a distributed breaker, not a persistent cache and not a retry
//! scheduler: state is process-local and callers decide whether to retry.

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod protected;
pub mod resilience;
pub mod system_context;

pub use cache::{CacheStats, TtlCache};
pub use config::{ConfigLoader, ResilienceConfig};
pub use error::{FailureClassification, ResilienceError, Result};
pub use protected::{
    AiBackend, AiRequest, AiResponse, CacheStoreBackend, ResilientAiClient, ResilientCacheStore,
    ResilientDatabase, ResilientResponse,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, Fallback,
    ServiceHealth, ServiceRegistry,
};
pub use system_context::ResilienceContext;

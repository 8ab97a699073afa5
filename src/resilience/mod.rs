//! # Resilience Module
//!
//! Fault isolation for unreliable dependencies: a circuit breaker per named
//! dependency, a registry that owns those breakers, and a deadline helper.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: stop calling a failing dependency for a cool-down, then probe
//! - **Service Registry**: the single entry point wrappers use to reach a dependency
//! - **Metrics**: cumulative call counts, state snapshots and the listener hook
//! - **Timeouts**: per-call deadlines whose expiry counts as a breaker failure
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::resilience::{CircuitBreaker, CircuitBreakerConfig, Fallback};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     reset_timeout: Duration::from_secs(30),
//!     half_open_max_attempts: 1,
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("database", config);
//!
//! let rows = circuit_breaker
//!     .execute(
//!         || async { Ok::<_, std::io::Error>(vec!["row"]) },
//!         Some(Fallback::value(Vec::new())),
//!     )
//!     .await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod registry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState, Fallback};
pub use config::CircuitBreakerConfig;
pub use metrics::{
    BreakerListener, CallOutcome, CircuitBreakerMetrics, CircuitBreakerStats, RegistrySnapshot,
    ServiceHealth, ServiceReport, TracingBreakerListener,
};
pub use registry::{HealthWindow, ServiceRegistry};
pub use timeout::with_timeout;

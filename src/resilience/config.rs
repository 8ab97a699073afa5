//! # Circuit Breaker Configuration
//!
//! Tuning for a single breaker. System-wide settings (per-component overrides,
//! health window) live in `crate::config::CircuitBreakerSettings` and
//! `crate::config::HealthSettings`.

use crate::error::{ResilienceError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before the circuit opens
    pub failure_threshold: u32,

    /// Cool-down in the open state before a probe is allowed
    pub reset_timeout: Duration,

    /// Successful probes needed in half-open before closing (probes run one at a time)
    pub half_open_max_attempts: u32,
}

impl CircuitBreakerConfig {
    /// Database: fail fast, recover quickly
    pub fn for_database() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(10),
            half_open_max_attempts: 1,
        }
    }

    /// Remote cache store: cheap to bypass, so open early
    pub fn for_cache_store() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(5),
            half_open_max_attempts: 1,
        }
    }

    /// Hosted AI API: outages tend to last, probe less often
    pub fn for_ai() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            half_open_max_attempts: 1,
        }
    }

    /// Preset for a well-known dependency name, or the default
    pub fn for_dependency(name: &str) -> Self {
        use crate::constants::dependencies;

        match name {
            dependencies::DATABASE => Self::for_database(),
            dependencies::CACHE_STORE => Self::for_cache_store(),
            dependencies::AI => Self::for_ai(),
            _ => Self::default(),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::configuration(
                "failure_threshold must be greater than 0",
            ));
        }

        if self.failure_threshold > 100 {
            return Err(ResilienceError::configuration(
                "failure_threshold should not exceed 100",
            ));
        }

        if self.reset_timeout.is_zero() {
            return Err(ResilienceError::configuration(
                "reset_timeout must be greater than 0",
            ));
        }

        if self.reset_timeout > Duration::from_secs(600) {
            return Err(ResilienceError::configuration(
                "reset_timeout should not exceed 600 seconds",
            ));
        }

        if self.half_open_max_attempts == 0 {
            return Err(ResilienceError::configuration(
                "half_open_max_attempts must be greater than 0",
            ));
        }

        if self.half_open_max_attempts > 50 {
            return Err(ResilienceError::configuration(
                "half_open_max_attempts should not exceed 50",
            ));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_attempts: 1,
        }
    }
}

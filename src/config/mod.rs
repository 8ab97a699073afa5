//! # Resilience Configuration
//!
//! Typed settings for every component of the resilience layer. All sections
//! default to production-sensible values, so an empty TOML file (or none at all)
//! yields a working configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::config::ConfigLoader;
//!
//! # fn main() -> resilience_core::Result<()> {
//! let config = ConfigLoader::new()
//!     .with_file("config/resilience.toml")
//!     .load()?;
//!
//! let database = config.circuit_breakers.config_for_component("database");
//! assert!(database.failure_threshold > 0);
//! # Ok(())
//! # }
//! ```
//!
//! Durations are stored as integer `*_ms` / `*_seconds` fields so they can be
//! overridden from the environment (`RESILIENCE__DATABASE__READ_TIMEOUT_MS=800`);
//! each section exposes `Duration` accessors.

pub mod loader;

use crate::constants::{cache, dependencies, health, latency, timeouts};
use crate::error::{ResilienceError, Result};
use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use loader::ConfigLoader;

/// Root configuration for the resilience layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breakers: CircuitBreakerSettings,
    pub health: HealthSettings,
    pub cache: CacheSettings,
    pub database: DatabaseSettings,
    pub cache_store: CacheStoreSettings,
    pub ai: AiSettings,
}

impl ResilienceConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.circuit_breakers.validate()?;
        self.health.validate()?;
        self.database.validate()?;
        self.cache_store.validate()?;
        self.ai.validate()?;
        self.validate_deadlines()
    }

    /// Every wrapper deadline must be shorter than its dependency's breaker cool-down
    fn validate_deadlines(&self) -> Result<()> {
        let deadlines = [
            (dependencies::DATABASE, "database.read_timeout_ms", self.database.read_timeout()),
            (dependencies::DATABASE, "database.write_timeout_ms", self.database.write_timeout()),
            (
                dependencies::DATABASE,
                "database.transaction_timeout_ms",
                self.database.transaction_timeout(),
            ),
            (
                dependencies::DATABASE,
                "database.execute_timeout_ms",
                self.database.execute_timeout(),
            ),
            (
                dependencies::DATABASE,
                "database.health_check_timeout_ms",
                self.database.health_check_timeout(),
            ),
            (
                dependencies::CACHE_STORE,
                "cache_store.operation_timeout_ms",
                self.cache_store.operation_timeout(),
            ),
            (dependencies::AI, "ai.request_timeout_ms", self.ai.request_timeout()),
        ];

        for (dependency, field, deadline) in deadlines {
            let cool_down = self
                .circuit_breakers
                .config_for_component(dependency)
                .reset_timeout;
            if deadline >= cool_down {
                return Err(ResilienceError::configuration(format!(
                    "{field} ({}ms) must be shorter than the {dependency} breaker reset_timeout ({}ms)",
                    deadline.as_millis(),
                    cool_down.as_millis()
                )));
            }
        }
        Ok(())
    }
}

/// Per-component circuit breaker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Registry size above which new registrations are logged as suspicious
    pub max_services: usize,
    /// Used for any dependency without an entry in `component_configs`
    pub default_config: BreakerComponentConfig,
    pub component_configs: HashMap<String, BreakerComponentConfig>,
}

impl CircuitBreakerSettings {
    /// Get configuration for a specific component
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerConfig {
        self.component_configs
            .get(component_name)
            .unwrap_or(&self.default_config)
            .to_breaker_config()
    }

    fn validate(&self) -> Result<()> {
        self.default_config
            .to_breaker_config()
            .validate()
            .map_err(|e| nested("circuit_breakers.default_config", e))?;

        for (name, component) in &self.component_configs {
            component
                .to_breaker_config()
                .validate()
                .map_err(|e| nested(&format!("circuit_breakers.component_configs.{name}"), e))?;
        }
        Ok(())
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let component_configs = dependencies::ALL
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    BreakerComponentConfig::from(&CircuitBreakerConfig::for_dependency(name)),
                )
            })
            .collect();

        Self {
            max_services: health::MAX_SERVICES,
            default_config: BreakerComponentConfig::from(&CircuitBreakerConfig::default()),
            component_configs,
        }
    }
}

/// Serializable form of [`CircuitBreakerConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerComponentConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_max_attempts: u32,
}

impl BreakerComponentConfig {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            half_open_max_attempts: self.half_open_max_attempts,
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerComponentConfig {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout_ms: config.reset_timeout.as_millis() as u64,
            half_open_max_attempts: config.half_open_max_attempts,
        }
    }
}

/// Recent-outcome window driving the `degraded` signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub window_seconds: u64,
    /// Samples required before a failure rate is trusted
    pub min_samples: usize,
    /// Failure rate (0.0 - 1.0) at or above which a closed breaker reads as degraded
    pub degraded_failure_rate: f64,
}

impl HealthSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.window_seconds == 0 {
            return Err(ResilienceError::configuration(
                "health.window_seconds must be greater than 0",
            ));
        }
        if !(self.degraded_failure_rate > 0.0 && self.degraded_failure_rate <= 1.0) {
            return Err(ResilienceError::configuration(
                "health.degraded_failure_rate must be in (0.0, 1.0]",
            ));
        }
        Ok(())
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            window_seconds: health::WINDOW_SECONDS,
            min_samples: health::MIN_SAMPLES,
            degraded_failure_rate: health::DEGRADED_FAILURE_RATE,
        }
    }
}

/// Bounds for the wrappers' local caches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum entries per wrapper cache; 0 disables the bound
    pub max_entries: usize,
}

impl CacheSettings {
    pub fn capacity(&self) -> Option<usize> {
        (self.max_entries > 0).then_some(self.max_entries)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: cache::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Database wrapper timeouts and slow-operation thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub transaction_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    pub health_check_timeout_ms: u64,
    pub slow_warning_ms: u64,
    pub slow_error_ms: u64,
}

impl DatabaseSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn slow_warning(&self) -> Duration {
        Duration::from_millis(self.slow_warning_ms)
    }

    pub fn slow_error(&self) -> Duration {
        Duration::from_millis(self.slow_error_ms)
    }

    fn validate(&self) -> Result<()> {
        let timeouts = [
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("transaction_timeout_ms", self.transaction_timeout_ms),
            ("execute_timeout_ms", self.execute_timeout_ms),
            ("health_check_timeout_ms", self.health_check_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ResilienceError::configuration(format!(
                    "database.{field} must be greater than 0"
                )));
            }
        }

        if self.slow_warning_ms > self.slow_error_ms {
            return Err(ResilienceError::configuration(
                "database.slow_warning_ms must not exceed database.slow_error_ms",
            ));
        }
        Ok(())
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: timeouts::DATABASE_READ_MS,
            write_timeout_ms: timeouts::DATABASE_WRITE_MS,
            transaction_timeout_ms: timeouts::DATABASE_TRANSACTION_MS,
            execute_timeout_ms: timeouts::DATABASE_EXECUTE_MS,
            health_check_timeout_ms: timeouts::DATABASE_HEALTH_CHECK_MS,
            slow_warning_ms: latency::SLOW_WARNING_MS,
            slow_error_ms: latency::SLOW_ERROR_MS,
        }
    }
}

/// Remote cache-store wrapper settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStoreSettings {
    pub operation_timeout_ms: u64,
    /// TTL for values mirrored into the local fallback cache when the caller gave none
    pub local_fallback_ttl_seconds: u64,
    /// TTL for local-only counters served while the remote store is unavailable
    pub counter_fallback_ttl_seconds: u64,
}

impl CacheStoreSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn local_fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.local_fallback_ttl_seconds)
    }

    pub fn counter_fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.counter_fallback_ttl_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(ResilienceError::configuration(
                "cache_store.operation_timeout_ms must be greater than 0",
            ));
        }
        if self.counter_fallback_ttl_seconds == 0 {
            return Err(ResilienceError::configuration(
                "cache_store.counter_fallback_ttl_seconds must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for CacheStoreSettings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: timeouts::CACHE_STORE_OPERATION_MS,
            local_fallback_ttl_seconds: cache::LOCAL_FALLBACK_TTL_SECONDS,
            counter_fallback_ttl_seconds: cache::COUNTER_FALLBACK_TTL_SECONDS,
        }
    }
}

/// Hosted AI client wrapper settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub request_timeout_ms: u64,
    pub response_ttl_seconds: u64,
    pub cache_responses: bool,
}

impl AiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(ResilienceError::configuration(
                "ai.request_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: timeouts::AI_REQUEST_MS,
            response_ttl_seconds: cache::AI_RESPONSE_TTL_SECONDS,
            cache_responses: true,
        }
    }
}

fn nested(section: &str, error: ResilienceError) -> ResilienceError {
    match error {
        ResilienceError::Configuration { message } => {
            ResilienceError::configuration(format!("{section}: {message}"))
        }
        other => other,
    }
}

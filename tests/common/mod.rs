//! Shared test doubles for the integration suites

#![allow(dead_code)]

pub mod mocks;
pub mod strategies;

pub use mocks::*;

use resilience_core::resilience::{CircuitBreakerConfig, ServiceRegistry};
use resilience_core::config::{BreakerComponentConfig, CircuitBreakerSettings, HealthSettings};
use std::sync::Arc;
use std::time::Duration;

/// Send test logs through the test writer
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Registry whose breakers for `names` use the given tuning
pub fn registry_with(names: &[&str], config: &CircuitBreakerConfig) -> Arc<ServiceRegistry> {
    let mut settings = CircuitBreakerSettings::default();
    for name in names {
        settings
            .component_configs
            .insert(name.to_string(), BreakerComponentConfig::from(config));
    }
    Arc::new(ServiceRegistry::new(settings, HealthSettings::default()))
}

pub fn breaker_config(failure_threshold: u32, reset_timeout_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        reset_timeout: Duration::from_millis(reset_timeout_ms),
        half_open_max_attempts: 1,
    }
}

//! # Circuit Breaker Metrics
//!
//! Snapshots for monitoring breaker and registry behavior, plus the optional
//! diagnostic hook (`BreakerListener`) through which breakers report state
//! transitions and call outcomes. Breakers never log on their own; the registry
//! installs `TracingBreakerListener` to turn those events into tracing records.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Cumulative call metrics for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached the protected operation
    pub total_calls: u64,

    pub success_count: u64,

    /// Availability failures (errors, timeouts)
    pub failure_count: u64,

    /// Calls answered with an application error (not counted as failures)
    pub application_errors: u64,

    /// Calls short-circuited without invoking the operation
    pub rejected_calls: u64,

    /// Fallback results served in place of the operation's
    pub fallback_calls: u64,

    pub total_duration: Duration,

    pub current_state: CircuitState,

    /// Failures over attempted calls (0.0 to 1.0)
    pub failure_rate: f64,

    pub success_rate: f64,

    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            application_errors: 0,
            rejected_calls: 0,
            fallback_calls: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing dependency health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Fallbacks: {} | Avg Duration: {}ms",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_calls,
            self.fallback_calls,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of one breaker's state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Failures since the last state transition
    pub failure_count: u32,
    /// Successes since the last state transition
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_state_change_at: DateTime<Utc>,
    pub probe_in_flight: bool,
    pub metrics: CircuitBreakerMetrics,
}

/// Derived health of a registered dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    /// Breaker closed and recent failure rate normal
    Healthy,
    /// Breaker half-open, or closed with an elevated recent failure rate
    Degraded,
    /// Breaker open
    Unhealthy,
}

impl std::fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Registry view of one dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub name: String,
    pub health: ServiceHealth,
    /// Failure rate over the registry's recent-outcome window
    pub recent_failure_rate: f64,
    pub recent_samples: usize,
    pub last_error: Option<String>,
    pub breaker: CircuitBreakerStats,
}

/// Registry-wide aggregate of every registered dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub services: HashMap<String, ServiceReport>,
    pub collected_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn add_service(&mut self, report: ServiceReport) {
        self.services.insert(report.name.clone(), report);
        self.collected_at = Utc::now();
    }

    /// Count of breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for report in self.services.values() {
            *counts.entry(report.breaker.state).or_insert(0) += 1;
        }
        counts
    }

    /// Services that are not fully healthy
    pub fn impaired_services(&self) -> Vec<&ServiceReport> {
        self.services
            .values()
            .filter(|report| report.health != ServiceHealth::Healthy)
            .collect()
    }

    /// Fraction of healthy services (1.0 when nothing is registered)
    pub fn health_score(&self) -> f64 {
        if self.services.is_empty() {
            return 1.0;
        }

        let healthy = self
            .services
            .values()
            .filter(|report| report.health == ServiceHealth::Healthy)
            .count();

        healthy as f64 / self.services.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.services
            .values()
            .map(|report| report.breaker.metrics.total_calls)
            .sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.services
            .values()
            .map(|report| report.breaker.metrics.failure_count)
            .sum()
    }

    pub fn format_summary(&self) -> String {
        let state_counts = self.count_by_state();
        let count = |state: CircuitState| state_counts.get(&state).copied().unwrap_or(0);

        format!(
            "Services: {} total | {} closed | {} open | {} half-open | Health: {:.1}% | Calls: {} | Failures: {}",
            self.services.len(),
            count(CircuitState::Closed),
            count(CircuitState::Open),
            count(CircuitState::HalfOpen),
            self.health_score() * 100.0,
            self.total_calls(),
            self.total_failures()
        )
    }
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a call that reached the protected operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    ApplicationError,
}

/// Optional diagnostic hook for breaker events.
///
/// Called after the breaker's internal lock is released. Implementations must
/// not call back into the same breaker's `execute`.
pub trait BreakerListener: Send + Sync + std::fmt::Debug {
    fn on_state_transition(&self, name: &str, from: CircuitState, to: CircuitState);

    fn on_call_rejected(&self, _name: &str, _retry_after: Duration) {}

    fn on_call_outcome(&self, _name: &str, _duration: Duration, _outcome: CallOutcome) {}
}

/// Forwards breaker events to tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBreakerListener;

impl BreakerListener for TracingBreakerListener {
    fn on_state_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => tracing::error!(
                dependency = name,
                from_state = %from,
                to_state = %to,
                "Circuit breaker opened (failing fast)"
            ),
            CircuitState::HalfOpen => tracing::info!(
                dependency = name,
                from_state = %from,
                to_state = %to,
                "Circuit breaker half-open (probing recovery)"
            ),
            CircuitState::Closed => tracing::info!(
                dependency = name,
                from_state = %from,
                to_state = %to,
                "Circuit breaker closed (recovered)"
            ),
        }
    }

    fn on_call_rejected(&self, name: &str, retry_after: Duration) {
        tracing::debug!(
            dependency = name,
            retry_after_ms = retry_after.as_millis() as u64,
            "Call short-circuited by open breaker"
        );
    }

    fn on_call_outcome(&self, name: &str, duration: Duration, outcome: CallOutcome) {
        tracing::trace!(
            dependency = name,
            duration_ms = duration.as_millis() as u64,
            outcome = ?outcome,
            "Protected call completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, health: ServiceHealth, state: CircuitState, calls: u64, failures: u64) -> ServiceReport {
        let mut metrics = CircuitBreakerMetrics::new();
        metrics.current_state = state;
        metrics.total_calls = calls;
        metrics.failure_count = failures;

        ServiceReport {
            name: name.to_string(),
            health,
            recent_failure_rate: 0.0,
            recent_samples: 0,
            last_error: None,
            breaker: CircuitBreakerStats {
                name: name.to_string(),
                state,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                last_state_change_at: Utc::now(),
                probe_in_flight: false,
                metrics,
            },
        }
    }

    #[test]
    fn test_metrics_health_calculation() {
        let mut metrics = CircuitBreakerMetrics::new();
        assert!(metrics.is_healthy());

        metrics.failure_rate = 0.15;
        assert!(!metrics.is_healthy());

        metrics.current_state = CircuitState::Open;
        metrics.failure_rate = 0.0;
        assert!(!metrics.is_healthy());

        metrics.current_state = CircuitState::HalfOpen;
        assert!(metrics.is_healthy());
    }

    #[test]
    fn test_registry_snapshot_aggregation() {
        let mut snapshot = RegistrySnapshot::new();
        assert_eq!(snapshot.health_score(), 1.0);

        snapshot.add_service(report("database", ServiceHealth::Healthy, CircuitState::Closed, 100, 5));
        snapshot.add_service(report("redis", ServiceHealth::Unhealthy, CircuitState::Open, 50, 25));

        assert_eq!(snapshot.total_calls(), 150);
        assert_eq!(snapshot.total_failures(), 30);
        assert_eq!(snapshot.health_score(), 0.5);

        let counts = snapshot.count_by_state();
        assert_eq!(counts.get(&CircuitState::Closed), Some(&1));
        assert_eq!(counts.get(&CircuitState::Open), Some(&1));

        let impaired = snapshot.impaired_services();
        assert_eq!(impaired.len(), 1);
        assert_eq!(impaired[0].name, "redis");
        assert!(snapshot.format_summary().contains("1 open"));
    }

    #[test]
    fn test_service_health_serializes_lowercase() {
        let json = serde_json::to_string(&ServiceHealth::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
        assert_eq!(ServiceHealth::Unhealthy.to_string(), "unhealthy");
    }
}

//! # Service Registry
//!
//! Named table of circuit breakers, one per dependency, and the single entry
//! point wrappers use to reach a real dependency. Breakers are created lazily
//! with the configured settings for their component name.
//!
//! Next to each breaker the registry keeps a short window of recent call
//! outcomes. The breaker only sees consecutive failures; the window lets a
//! closed breaker report `degraded` when calls fail intermittently.

use crate::config::{CircuitBreakerSettings, HealthSettings, ResilienceConfig};
use crate::error::{ResilienceError, Result};
use crate::resilience::{
    BreakerListener, CircuitBreaker, CircuitState, Fallback, RegistrySnapshot, ServiceHealth,
    ServiceReport, TracingBreakerListener,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Rolling window of recent call outcomes for one dependency
#[derive(Debug, Clone)]
pub struct HealthWindow {
    span: Duration,
    outcomes: VecDeque<(Instant, bool)>,
    last_error: Option<String>,
}

impl HealthWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            outcomes: VecDeque::new(),
            last_error: None,
        }
    }

    pub fn record_success(&mut self) {
        self.push(true);
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.push(false);
        self.last_error = Some(error.into());
    }

    /// Failure rate and sample count over the window
    pub fn failure_rate(&mut self) -> (f64, usize) {
        self.prune(Instant::now());
        let samples = self.outcomes.len();
        if samples == 0 {
            return (0.0, 0);
        }
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count();
        (failures as f64 / samples as f64, samples)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.last_error = None;
    }

    fn push(&mut self, success: bool) {
        let now = Instant::now();
        self.prune(now);
        self.outcomes.push_back((now, success));
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.outcomes.front() {
            if now.duration_since(*at) > self.span {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
struct RegistryEntry {
    breaker: Arc<CircuitBreaker>,
    window: Mutex<HealthWindow>,
}

/// Process-local table of named dependencies and their breakers
#[derive(Debug)]
pub struct ServiceRegistry {
    entries: DashMap<String, Arc<RegistryEntry>>,
    breaker_settings: CircuitBreakerSettings,
    health_settings: HealthSettings,
    listener: Option<Arc<dyn BreakerListener>>,
}

static GLOBAL_REGISTRY: OnceLock<ServiceRegistry> = OnceLock::new();

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerSettings::default(), HealthSettings::default())
    }
}

impl ServiceRegistry {
    /// Create a registry whose breakers report transitions through tracing
    pub fn new(breaker_settings: CircuitBreakerSettings, health_settings: HealthSettings) -> Self {
        Self {
            entries: DashMap::new(),
            breaker_settings,
            health_settings,
            listener: Some(Arc::new(TracingBreakerListener)),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.circuit_breakers.clone(), config.health.clone())
    }

    /// Replace the listener installed on breakers created from now on
    pub fn with_listener(mut self, listener: Arc<dyn BreakerListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Create breakers without any diagnostic hook
    pub fn without_listener(mut self) -> Self {
        self.listener = None;
        self
    }

    /// Shared process-wide registry with default settings.
    ///
    /// Convenience only; nothing in this crate depends on it.
    pub fn global() -> &'static ServiceRegistry {
        GLOBAL_REGISTRY.get_or_init(ServiceRegistry::default)
    }

    /// Run `operation` under the named dependency's breaker.
    ///
    /// Breaker rejections surface as `ResilienceError::CircuitBreakerOpen`.
    /// Every call that reaches the operation is also recorded in the
    /// dependency's health window.
    pub async fn execute<'f, F, Fut, T>(
        &self,
        name: &str,
        operation: F,
        fallback: Option<Fallback<'f, T>>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let entry = self.entry(name);
        let window = &entry.window;

        let result = entry
            .breaker
            .execute(
                move || async move {
                    let outcome = operation().await;
                    match &outcome {
                        Err(error) if error.is_availability_failure() => {
                            window.lock().record_failure(error.to_string());
                        }
                        _ => window.lock().record_success(),
                    }
                    outcome
                },
                fallback,
            )
            .await;

        result.map_err(ResilienceError::from)
    }

    /// Breaker for `name`, created with its component settings if missing
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        Arc::clone(&self.entry(name).breaker)
    }

    /// Existing breaker for diagnostics; callers must not drive it directly
    pub fn get_circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.entries
            .get(name)
            .map(|entry| Arc::clone(&entry.value().breaker))
    }

    /// False only while the breaker is open, regardless of the cool-down
    pub fn is_available(&self, name: &str) -> bool {
        self.get_circuit_breaker(name)
            .map_or(true, |breaker| breaker.state() != CircuitState::Open)
    }

    pub fn is_degraded(&self, name: &str) -> bool {
        self.health(name) == ServiceHealth::Degraded
    }

    /// Derived health: open is unhealthy; half-open, or closed with an elevated
    /// recent failure rate, is degraded
    pub fn health(&self, name: &str) -> ServiceHealth {
        match self.entries.get(name) {
            Some(entry) => self.derive_health(entry.value()).0,
            None => ServiceHealth::Healthy,
        }
    }

    /// Force the dependency healthy after an authoritative probe succeeded
    pub fn mark_healthy(&self, name: &str) {
        let entry = self.entry(name);
        let previous = entry.breaker.state();
        entry.breaker.reset();
        entry.window.lock().clear();

        if previous != CircuitState::Closed {
            info!(dependency = name, from_state = %previous, "Dependency marked healthy");
        }
    }

    /// Force the breaker open after an authoritative probe failed
    pub fn mark_unhealthy(&self, name: &str, reason: impl fmt::Display) {
        let reason = reason.to_string();
        let entry = self.entry(name);
        entry.window.lock().record_failure(reason.clone());
        entry.breaker.force_open();

        warn!(dependency = name, reason = %reason, "Dependency marked unhealthy");
    }

    /// Count a failure noticed outside `execute` (e.g. a dropped connection)
    pub fn record_failure(&self, name: &str, error: impl fmt::Display) {
        let entry = self.entry(name);
        entry.window.lock().record_failure(error.to_string());
        entry.breaker.record_failure();
    }

    /// Registered dependency names, sorted
    pub fn list_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn service_report(&self, name: &str) -> Option<ServiceReport> {
        let entry = self.entries.get(name)?;
        Some(self.report(name, entry.value()))
    }

    pub fn health_report(&self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::new();
        for entry in self.entries.iter() {
            snapshot.add_service(self.report(entry.key(), entry.value()));
        }
        snapshot
    }

    /// Force every breaker open (emergency stop)
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");
        for entry in self.entries.iter() {
            entry.value().breaker.force_open();
            warn!(dependency = entry.key().as_str(), "Circuit breaker forced open");
        }
    }

    /// Reset every breaker and health window (emergency recovery)
    pub fn reset_all(&self) {
        warn!("Resetting all circuit breakers (emergency recovery)");
        for entry in self.entries.iter() {
            entry.value().breaker.reset();
            entry.value().window.lock().clear();
        }
    }

    fn entry(&self, name: &str) -> Arc<RegistryEntry> {
        if let Some(entry) = self.entries.get(name) {
            return Arc::clone(entry.value());
        }

        let entry = Arc::clone(
            self.entries
                .entry(name.to_string())
                .or_insert_with(|| self.create_entry(name))
                .value(),
        );

        let registered = self.entries.len();
        if registered > self.breaker_settings.max_services {
            warn!(
                dependency = name,
                current_count = registered,
                max_allowed = self.breaker_settings.max_services,
                "Registry exceeds expected number of services"
            );
        }

        entry
    }

    fn create_entry(&self, name: &str) -> Arc<RegistryEntry> {
        let config = self.breaker_settings.config_for_component(name);
        let mut breaker = CircuitBreaker::new(name, config);
        if let Some(listener) = &self.listener {
            breaker = breaker.with_listener(Arc::clone(listener));
        }

        info!(
            dependency = name,
            failure_threshold = breaker.config().failure_threshold,
            reset_timeout_ms = breaker.config().reset_timeout.as_millis() as u64,
            "Created circuit breaker"
        );

        Arc::new(RegistryEntry {
            breaker: Arc::new(breaker),
            window: Mutex::new(HealthWindow::new(self.health_settings.window())),
        })
    }

    fn derive_health(&self, entry: &RegistryEntry) -> (ServiceHealth, f64, usize) {
        let (rate, samples) = entry.window.lock().failure_rate();
        let health = match entry.breaker.state() {
            CircuitState::Open => ServiceHealth::Unhealthy,
            CircuitState::HalfOpen => ServiceHealth::Degraded,
            CircuitState::Closed
                if samples >= self.health_settings.min_samples
                    && rate >= self.health_settings.degraded_failure_rate =>
            {
                ServiceHealth::Degraded
            }
            CircuitState::Closed => ServiceHealth::Healthy,
        };
        (health, rate, samples)
    }

    fn report(&self, name: &str, entry: &RegistryEntry) -> ServiceReport {
        let (health, recent_failure_rate, recent_samples) = self.derive_health(entry);
        ServiceReport {
            name: name.to_string(),
            health,
            recent_failure_rate,
            recent_samples,
            last_error: entry.window.lock().last_error().map(str::to_string),
            breaker: entry.breaker.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::dependencies;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> ServiceRegistry {
        ServiceRegistry::default().without_listener()
    }

    async fn fail(registry: &ServiceRegistry, name: &str) -> Result<()> {
        registry
            .execute(
                name,
                move || async move { Err(ResilienceError::connection(name, "connection refused")) },
                None,
            )
            .await
    }

    #[tokio::test]
    async fn test_lazy_creation_uses_component_config() {
        let registry = registry();
        assert!(registry.get_circuit_breaker(dependencies::AI).is_none());

        let value = registry
            .execute(dependencies::AI, || async { Ok("answer") }, None)
            .await
            .unwrap();
        assert_eq!(value, "answer");

        let breaker = registry.get_circuit_breaker(dependencies::AI).unwrap();
        assert_eq!(breaker.config().reset_timeout, Duration::from_secs(60));
        assert_eq!(registry.list_services(), vec![dependencies::AI.to_string()]);
    }

    #[tokio::test]
    async fn test_open_breaker_surfaces_circuit_open_error() {
        let registry = registry();
        for _ in 0..3 {
            let _ = fail(&registry, dependencies::CACHE_STORE).await;
        }
        assert!(!registry.is_available(dependencies::CACHE_STORE));

        let result: Result<()> = registry
            .execute(dependencies::CACHE_STORE, || async { Ok(()) }, None)
            .await;
        match result {
            Err(ResilienceError::CircuitBreakerOpen { dependency, retry_after_ms }) => {
                assert_eq!(dependency, dependencies::CACHE_STORE);
                assert!(retry_after_ms > 0);
            }
            other => panic!("expected CircuitBreakerOpen, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forced_open_serves_fallback_without_calling_operation() {
        let registry = registry();
        registry.mark_unhealthy(dependencies::DATABASE, "ping failed");

        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let value = registry
            .execute(
                dependencies::DATABASE,
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                },
                Some(Fallback::value(42)),
            )
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.health(dependencies::DATABASE), ServiceHealth::Unhealthy);
    }

    #[tokio::test]
    async fn test_application_error_propagates_and_stays_healthy() {
        let registry = registry();

        let result: Result<u32> = registry
            .execute(
                dependencies::DATABASE,
                || async { Err(ResilienceError::operation("database", "unique violation")) },
                Some(Fallback::value(0)),
            )
            .await;

        assert!(matches!(result, Err(ResilienceError::Operation { .. })));
        assert_eq!(registry.health(dependencies::DATABASE), ServiceHealth::Healthy);
    }

    #[tokio::test]
    async fn test_intermittent_failures_read_as_degraded() {
        let registry = registry();
        let name = "search";

        for round in 0..10 {
            if round % 3 == 0 {
                let _ = fail(&registry, name).await;
            } else {
                let _ = registry.execute(name, || async { Ok(()) }, None).await;
            }
        }

        assert!(registry.is_available(name));
        assert!(registry.is_degraded(name));
        let report = registry.service_report(name).unwrap();
        assert_eq!(report.recent_samples, 10);
        assert!(report.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_mark_healthy_closes_and_clears() {
        let registry = registry();
        registry.mark_unhealthy(dependencies::CACHE_STORE, "ping timeout");
        assert!(!registry.is_available(dependencies::CACHE_STORE));

        registry.mark_healthy(dependencies::CACHE_STORE);

        assert!(registry.is_available(dependencies::CACHE_STORE));
        assert_eq!(registry.health(dependencies::CACHE_STORE), ServiceHealth::Healthy);
    }

    #[tokio::test]
    async fn test_record_failure_counts_toward_threshold() {
        let registry = registry();
        for _ in 0..5 {
            registry.record_failure(dependencies::DATABASE, "connection lost");
        }
        assert!(!registry.is_available(dependencies::DATABASE));
    }

    #[tokio::test]
    async fn test_health_report_and_bulk_operations() {
        let registry = registry();
        let _ = registry.execute("a", || async { Ok(()) }, None).await;
        let _ = registry.execute("b", || async { Ok(()) }, None).await;

        registry.force_open_all();
        let report = registry.health_report();
        assert_eq!(report.services.len(), 2);
        assert_eq!(report.health_score(), 0.0);

        registry.reset_all();
        assert_eq!(registry.health_report().health_score(), 1.0);
    }

    #[test]
    fn test_unknown_service_is_available_and_healthy() {
        let registry = registry();
        assert!(registry.is_available("never-called"));
        assert_eq!(registry.health("never-called"), ServiceHealth::Healthy);
        assert!(registry.list_services().is_empty());
    }

    #[test]
    fn test_health_window_prunes_old_outcomes() {
        let mut window = HealthWindow::new(Duration::from_millis(20));
        window.record_failure("boom");
        std::thread::sleep(Duration::from_millis(30));
        window.record_success();

        assert_eq!(window.failure_rate(), (0.0, 1));
        assert_eq!(window.last_error(), Some("boom"));
    }
}

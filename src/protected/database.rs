//! # Resilient Database
//!
//! Wraps injected database operations with breaker protection and per-kind
//! deadlines. No fallback is ever supplied: masking a failed read or write as
//! success is unsafe, so an unavailable database surfaces as
//! `ResilienceError::DatabaseUnavailable` with a caller-usable retry hint.
//!
//! | kind        | default timeout | critical |
//! |-------------|-----------------|----------|
//! | read        | 10s             | no       |
//! | write       | 5s              | yes      |
//! | transaction | 30s             | yes      |
//! | execute     | 10s             | no       |
//!
//! Critical operations log failures at error level. Slow successes are logged
//! against two latency thresholds and never count as breaker failures.

use crate::config::DatabaseSettings;
use crate::constants::dependencies;
use crate::error::{ResilienceError, Result};
use crate::logging::{self, SlowOperationSeverity};
use crate::protected::ResilientResponse;
use crate::resilience::{with_timeout, CircuitState, ServiceHealth, ServiceRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Category of database operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseOperationKind {
    Read,
    Write,
    Transaction,
    Execute,
}

impl DatabaseOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Transaction => "transaction",
            Self::Execute => "execute",
        }
    }

    /// Whether failures of this kind lose caller data
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Write | Self::Transaction)
    }

    pub fn default_timeout(&self, settings: &DatabaseSettings) -> Duration {
        match self {
            Self::Read => settings.read_timeout(),
            Self::Write => settings.write_timeout(),
            Self::Transaction => settings.transaction_timeout(),
            Self::Execute => settings.execute_timeout(),
        }
    }
}

impl fmt::Display for DatabaseOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct DatabaseCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    transactions: AtomicU64,
    executes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    unavailable: AtomicU64,
    slow_warnings: AtomicU64,
    slow_errors: AtomicU64,
}

impl DatabaseCounters {
    fn record_operation(&self, kind: DatabaseOperationKind) {
        let counter = match kind {
            DatabaseOperationKind::Read => &self.reads,
            DatabaseOperationKind::Write => &self.writes,
            DatabaseOperationKind::Transaction => &self.transactions,
            DatabaseOperationKind::Execute => &self.executes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of database wrapper activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub dependency: String,
    pub reads: u64,
    pub writes: u64,
    pub transactions: u64,
    pub executes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub unavailable: u64,
    pub slow_warnings: u64,
    pub slow_errors: u64,
    pub breaker_state: Option<CircuitState>,
    pub health: ServiceHealth,
}

/// Database access through the service registry
#[derive(Debug)]
pub struct ResilientDatabase {
    registry: Arc<ServiceRegistry>,
    settings: DatabaseSettings,
    dependency: String,
    counters: DatabaseCounters,
}

impl ResilientDatabase {
    pub fn new(registry: Arc<ServiceRegistry>, settings: DatabaseSettings) -> Self {
        Self {
            registry,
            settings,
            dependency: dependencies::DATABASE.to_string(),
            counters: DatabaseCounters::default(),
        }
    }

    /// Register under a different dependency name (e.g. a read replica)
    pub fn with_dependency_name(mut self, name: impl Into<String>) -> Self {
        self.dependency = name.into();
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub async fn read<T, F, Fut>(&self, operation: &str, run: F) -> Result<ResilientResponse<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(DatabaseOperationKind::Read, operation, None, run).await
    }

    pub async fn write<T, F, Fut>(&self, operation: &str, run: F) -> Result<ResilientResponse<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(DatabaseOperationKind::Write, operation, None, run).await
    }

    pub async fn transaction<T, F, Fut>(
        &self,
        operation: &str,
        run: F,
    ) -> Result<ResilientResponse<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(DatabaseOperationKind::Transaction, operation, None, run)
            .await
    }

    pub async fn execute<T, F, Fut>(&self, operation: &str, run: F) -> Result<ResilientResponse<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(DatabaseOperationKind::Execute, operation, None, run)
            .await
    }

    /// Run with an explicit deadline instead of the kind's default
    pub async fn run_with_timeout<T, F, Fut>(
        &self,
        kind: DatabaseOperationKind,
        operation: &str,
        timeout: Duration,
        run: F,
    ) -> Result<ResilientResponse<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(kind, operation, Some(timeout), run).await
    }

    /// Probe the database outside the breaker and correct its state
    pub async fn check_health<F, Fut>(&self, ping: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match with_timeout("database.health_check", self.settings.health_check_timeout(), ping())
            .await
        {
            Ok(()) => {
                self.registry.mark_healthy(&self.dependency);
                true
            }
            Err(error) => {
                self.registry.mark_unhealthy(&self.dependency, &error);
                false
            }
        }
    }

    /// Report a connection drop noticed outside any call
    pub fn report_connection_lost(&self, reason: &str) {
        warn!(dependency = %self.dependency, reason = reason, "Database connection lost");
        self.registry
            .record_failure(&self.dependency, ResilienceError::connection(&self.dependency, reason));
    }

    pub fn is_available(&self) -> bool {
        self.registry.is_available(&self.dependency)
    }

    pub fn stats(&self) -> DatabaseStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        DatabaseStats {
            dependency: self.dependency.clone(),
            reads: load(&self.counters.reads),
            writes: load(&self.counters.writes),
            transactions: load(&self.counters.transactions),
            executes: load(&self.counters.executes),
            failures: load(&self.counters.failures),
            timeouts: load(&self.counters.timeouts),
            unavailable: load(&self.counters.unavailable),
            slow_warnings: load(&self.counters.slow_warnings),
            slow_errors: load(&self.counters.slow_errors),
            breaker_state: self
                .registry
                .get_circuit_breaker(&self.dependency)
                .map(|breaker| breaker.state()),
            health: self.registry.health(&self.dependency),
        }
    }

    async fn run<T, F, Fut>(
        &self,
        kind: DatabaseOperationKind,
        operation: &str,
        timeout: Option<Duration>,
        run: F,
    ) -> Result<ResilientResponse<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = timeout.unwrap_or_else(|| kind.default_timeout(&self.settings));
        self.counters.record_operation(kind);
        let started = Instant::now();

        let result = self
            .registry
            .execute(
                &self.dependency,
                || with_timeout(operation, limit, run()),
                None,
            )
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                self.observe_latency(operation, elapsed);
                logging::log_dependency_operation(
                    &self.dependency,
                    operation,
                    "ok",
                    elapsed,
                    Some(kind.as_str()),
                );
                Ok(ResilientResponse::fresh(value, elapsed))
            }
            Err(error) => Err(self.surface_error(kind, operation, error)),
        }
    }

    fn observe_latency(&self, operation: &str, elapsed: Duration) {
        let (severity, threshold) = if elapsed >= self.settings.slow_error() {
            self.counters.slow_errors.fetch_add(1, Ordering::Relaxed);
            (SlowOperationSeverity::Error, self.settings.slow_error())
        } else if elapsed >= self.settings.slow_warning() {
            self.counters.slow_warnings.fetch_add(1, Ordering::Relaxed);
            (SlowOperationSeverity::Warning, self.settings.slow_warning())
        } else {
            return;
        };
        logging::log_slow_operation(&self.dependency, operation, elapsed, threshold, severity);
    }

    /// Map availability failures to `DatabaseUnavailable`; everything else passes through
    fn surface_error(
        &self,
        kind: DatabaseOperationKind,
        operation: &str,
        error: ResilienceError,
    ) -> ResilienceError {
        let surfaced = match error {
            ResilienceError::CircuitBreakerOpen { retry_after_ms, .. } => {
                self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
                ResilienceError::DatabaseUnavailable {
                    operation: operation.to_string(),
                    retry_after_ms,
                    reason: "circuit breaker open".to_string(),
                }
            }
            ResilienceError::Connection { message, .. } => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
                let retry_after = self.registry.breaker(&self.dependency).retry_after();
                ResilienceError::database_unavailable(operation, retry_after, message)
            }
            ResilienceError::Timeout { .. } => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                error
            }
            other => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                other
            }
        };

        let message = surfaced.to_string();
        if kind.is_critical() {
            logging::log_error(&self.dependency, operation, &message, Some(kind.as_str()));
        } else {
            warn!(
                dependency = %self.dependency,
                operation = operation,
                kind = %kind,
                error = %message,
                "Database operation failed"
            );
        }
        surfaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn database() -> ResilientDatabase {
        let registry = Arc::new(ServiceRegistry::default().without_listener());
        ResilientDatabase::new(registry, DatabaseSettings::default())
    }

    #[test]
    fn test_kind_timeouts_and_criticality() {
        let settings = DatabaseSettings::default();
        assert!(
            DatabaseOperationKind::Transaction.default_timeout(&settings)
                > DatabaseOperationKind::Read.default_timeout(&settings)
        );
        assert!(DatabaseOperationKind::Write.is_critical());
        assert!(!DatabaseOperationKind::Read.is_critical());
    }

    #[tokio::test]
    async fn test_successful_read_is_fresh() {
        let db = database();
        let response = db.read("users.find", || async { Ok(vec![1, 2, 3]) }).await.unwrap();

        assert_eq!(response.value, vec![1, 2, 3]);
        assert!(response.is_authoritative());
        assert_eq!(db.stats().reads, 1);
    }

    #[tokio::test]
    async fn test_application_error_passes_through() {
        let db = database();
        let result: Result<ResilientResponse<()>> = db
            .write("users.insert", || async {
                Err(ResilienceError::operation("database", "duplicate key"))
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Operation { .. })));
        assert_eq!(db.stats().breaker_state, Some(CircuitState::Closed));
        assert_eq!(db.stats().health, ServiceHealth::Healthy);
    }

    #[tokio::test]
    async fn test_connection_error_surfaces_as_unavailable() {
        let db = database();
        let result: Result<ResilientResponse<()>> = db
            .read("users.find", || async {
                Err(ResilienceError::connection("database", "connection refused"))
            })
            .await;

        match result {
            Err(ResilienceError::DatabaseUnavailable { operation, reason, .. }) => {
                assert_eq!(operation, "users.find");
                assert_eq!(reason, "connection refused");
            }
            other => panic!("expected DatabaseUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_breaker_surfaces_retry_after() {
        let db = database();
        for _ in 0..5 {
            let _ = db
                .read("users.find", || async {
                    Err::<(), _>(ResilienceError::connection("database", "refused"))
                })
                .await;
        }

        let result: Result<ResilientResponse<()>> = db.read("users.find", || async { Ok(()) }).await;
        match result {
            Err(ResilienceError::DatabaseUnavailable { retry_after_ms, reason, .. }) => {
                assert!(retry_after_ms > 0);
                assert_eq!(reason, "circuit breaker open");
            }
            other => panic!("expected DatabaseUnavailable, got {other:?}"),
        }
        assert!(!db.is_available());
    }

    #[tokio::test]
    async fn test_slow_success_is_not_a_failure() {
        let registry = Arc::new(ServiceRegistry::default().without_listener());
        let settings = DatabaseSettings {
            slow_warning_ms: 10,
            slow_error_ms: 1_000,
            ..Default::default()
        };
        let db = ResilientDatabase::new(registry, settings);

        let response = db
            .read("reports.aggregate", || async {
                sleep(Duration::from_millis(20)).await;
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(response.value, 42);
        let stats = db.stats();
        assert_eq!(stats.slow_warnings, 1);
        assert_eq!(stats.slow_errors, 0);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn test_health_check_corrects_breaker() {
        let db = database();

        let healthy = db
            .check_health(|| async { Err(ResilienceError::connection("database", "no route")) })
            .await;
        assert!(!healthy);
        assert!(!db.is_available());

        assert!(db.check_health(|| async { Ok(()) }).await);
        assert!(db.is_available());
    }

    #[tokio::test]
    async fn test_reported_connection_loss_counts() {
        let db = database();
        for _ in 0..5 {
            db.report_connection_lost("socket closed");
        }
        assert_eq!(db.stats().breaker_state, Some(CircuitState::Open));
    }
}

//! # Circuit Breaker Implementation
//!
//! Fault isolation for a single named dependency, following the classic three
//! states: Closed (normal operation), Open (failing fast) and Half-Open (probing
//! recovery).
//!
//! ```text
//! Closed   → Open:     failure_count >= failure_threshold
//! Open     → HalfOpen: reset_timeout elapsed, first caller claims the probe
//! HalfOpen → Closed:   half_open_max_attempts successful probes
//! HalfOpen → Open:     any probe failure (cool-down restarts)
//! ```
//!
//! ## Concurrency
//!
//! Every admission decision and transition happens under one short
//! `parking_lot` lock that is never held across an `.await`. Half-open probes are
//! single-flight: the caller that claims the probe slot gets a `ProbeGuard`, and
//! everyone arriving while it is outstanding is short-circuited as if the
//! circuit were still open. The guard releases the slot on drop, so a cancelled
//! probe never wedges the breaker.
//!
//! Each transition bumps a generation counter. An outcome from a call admitted
//! under an older generation updates metrics but never moves the state machine,
//! so a late result cannot undo a forced reset or a newer transition.

use crate::error::FailureClassification;
use crate::resilience::{
    BreakerListener, CallOutcome, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerStats,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lock-free cumulative counters, kept off the state lock
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    application_errors: AtomicU64,
    rejected_calls: AtomicU64,
    fallback_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            application_errors: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_call(&self, duration: Duration, outcome: CallOutcome) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        let counter = match outcome {
            CallOutcome::Success => &self.success_count,
            CallOutcome::Failure => &self.failure_count,
            CallOutcome::ApplicationError => &self.application_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_fallback(&self) {
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CircuitState) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_nanos(total_duration_nanos / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            application_errors: self.application_errors.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state,
            failure_rate,
            success_rate,
            average_duration,
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - one probe call at a time
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by breaker-protected execution
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or a probe is already in flight) and no fallback was given
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen {
        component: String,
        retry_after: Duration,
    },

    /// Operation ran and failed; the original error is preserved
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Substitute result supplier passed to `execute`.
///
/// Invoked with no arguments. It must not call back into the breaker guarding
/// the same dependency.
pub struct Fallback<'a, T> {
    produce: Box<dyn FnOnce() -> BoxFuture<'a, T> + Send + 'a>,
}

impl<'a, T: Send + 'a> Fallback<'a, T> {
    /// Fallback from an async closure
    pub fn new<F, Fut>(produce: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = T> + Send + 'a,
    {
        Self {
            produce: Box::new(move || Box::pin(produce())),
        }
    }

    /// Fallback from a synchronous closure
    pub fn from_fn<F>(produce: F) -> Self
    where
        F: FnOnce() -> T + Send + 'a,
    {
        Self::new(move || async move { produce() })
    }

    /// Fallback to a fixed value
    pub fn value(value: T) -> Self {
        Self::new(move || async move { value })
    }
}

impl<T> Fallback<'_, T> {
    async fn invoke(self) -> T {
        (self.produce)().await
    }
}

impl<T> fmt::Debug for Fallback<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback").finish_non_exhaustive()
    }
}

/// State machine guarded by the breaker lock
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change: Instant,
    last_state_change_at: DateTime<Utc>,
    generation: u64,
    probe_owner: Option<u64>,
    next_probe_token: u64,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_state_change: Instant::now(),
            last_state_change_at: Utc::now(),
            generation: 0,
            probe_owner: None,
            next_probe_token: 0,
        }
    }

    fn claim_probe(&mut self) -> Option<u64> {
        if self.probe_owner.is_some() {
            return None;
        }
        self.next_probe_token += 1;
        self.probe_owner = Some(self.next_probe_token);
        Some(self.next_probe_token)
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

/// Releases a claimed half-open probe slot
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    token: u64,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        let mut core = self.breaker.core.lock();
        if core.probe_owner == Some(self.token) {
            core.probe_owner = None;
        }
    }
}

enum Admission<'a> {
    Call {
        generation: u64,
        _probe: Option<ProbeGuard<'a>>,
    },
    Reject {
        retry_after: Duration,
    },
}

/// Circuit breaker for one named dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<BreakerCore>,
    metrics: AtomicCircuitBreakerMetrics,
    listener: Option<Arc<dyn BreakerListener>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker in the closed state
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore::new()),
            metrics: AtomicCircuitBreakerMetrics::new(),
            listener: None,
        }
    }

    /// Attach a diagnostic listener
    pub fn with_listener(mut self, listener: Arc<dyn BreakerListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Never transitions, even if the cool-down has elapsed.
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Remaining cool-down while open, zero otherwise
    pub fn retry_after(&self) -> Duration {
        let core = self.core.lock();
        match core.state {
            CircuitState::Open => self
                .config
                .reset_timeout
                .saturating_sub(core.last_state_change.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// Whether a call arriving now would reach the operation (no side effects)
    pub fn is_call_permitted(&self) -> bool {
        let core = self.core.lock();
        match core.state {
            CircuitState::Closed => true,
            CircuitState::Open => core.last_state_change.elapsed() >= self.config.reset_timeout,
            CircuitState::HalfOpen => core.probe_owner.is_none(),
        }
    }

    /// Execute without a fallback
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureClassification,
    {
        self.execute(operation, None).await
    }

    /// Execute an operation under breaker protection.
    ///
    /// - Open (cool-down running, or probe in flight): the operation is not
    ///   invoked; the fallback result is returned, else `CircuitOpen`.
    /// - Availability failure: counted; the fallback result replaces the error
    ///   when given, else the original error is returned.
    /// - Application error (per `FailureClassification`): returned as-is, never
    ///   replaced by the fallback, and counts as the dependency answering.
    pub async fn execute<'f, F, Fut, T, E>(
        &self,
        operation: F,
        fallback: Option<Fallback<'f, T>>,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureClassification,
    {
        let (generation, probe) = match self.admit() {
            Admission::Reject { retry_after } => {
                self.metrics.record_rejection();
                if let Some(listener) = &self.listener {
                    listener.on_call_rejected(&self.name, retry_after);
                }
                return match fallback {
                    Some(fallback) => Ok(self.serve_fallback(fallback).await),
                    None => Err(CircuitBreakerError::CircuitOpen {
                        component: self.name.clone(),
                        retry_after,
                    }),
                };
            }
            Admission::Call { generation, _probe } => (generation, _probe),
        };

        let started = Instant::now();
        let result = operation().await;
        let duration = started.elapsed();

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(err) if err.is_availability_failure() => CallOutcome::Failure,
            Err(_) => CallOutcome::ApplicationError,
        };
        self.record_outcome(generation, duration, outcome);
        drop(probe);

        match result {
            Ok(value) => Ok(value),
            Err(err) if outcome == CallOutcome::Failure => match fallback {
                Some(fallback) => Ok(self.serve_fallback(fallback).await),
                None => Err(CircuitBreakerError::OperationFailed(err)),
            },
            Err(err) => Err(CircuitBreakerError::OperationFailed(err)),
        }
    }

    /// Count a failure observed outside `execute` (e.g. a dropped connection)
    pub fn record_failure(&self) {
        let generation = self.core.lock().generation;
        self.record_outcome(generation, Duration::ZERO, CallOutcome::Failure);
    }

    /// Count a success observed outside `execute`
    pub fn record_success(&self) {
        let generation = self.core.lock().generation;
        self.record_outcome(generation, Duration::ZERO, CallOutcome::Success);
    }

    /// Force the open state; the cool-down restarts now
    pub fn force_open(&self) {
        let transition = {
            let mut core = self.core.lock();
            self.transition_locked(&mut core, CircuitState::Open)
        };
        self.notify(transition);
    }

    /// Force the closed state
    pub fn force_closed(&self) {
        let transition = {
            let mut core = self.core.lock();
            self.transition_locked(&mut core, CircuitState::Closed)
        };
        self.notify(transition);
    }

    /// Force closed with zeroed counters and no failure history
    pub fn reset(&self) {
        let transition = {
            let mut core = self.core.lock();
            let transition = self.transition_locked(&mut core, CircuitState::Closed);
            core.last_failure_at = None;
            transition
        };
        self.notify(transition);
    }

    /// Cumulative metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics.snapshot(self.state())
    }

    /// Diagnostic snapshot of state, counters and metrics
    pub fn stats(&self) -> CircuitBreakerStats {
        let core = self.core.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            last_failure_at: core.last_failure_at,
            last_state_change_at: core.last_state_change_at,
            probe_in_flight: core.probe_owner.is_some(),
            metrics: self.metrics.snapshot(core.state),
        }
    }

    fn admit(&self) -> Admission<'_> {
        let (admission, transition) = {
            let mut core = self.core.lock();
            match core.state {
                CircuitState::Closed => (
                    Admission::Call {
                        generation: core.generation,
                        _probe: None,
                    },
                    None,
                ),
                CircuitState::Open => {
                    let elapsed = core.last_state_change.elapsed();
                    if elapsed < self.config.reset_timeout {
                        (
                            Admission::Reject {
                                retry_after: self.config.reset_timeout - elapsed,
                            },
                            None,
                        )
                    } else {
                        let transition = self.transition_locked(&mut core, CircuitState::HalfOpen);
                        (self.claim_probe_locked(&mut core), transition)
                    }
                }
                CircuitState::HalfOpen => (self.claim_probe_locked(&mut core), None),
            }
        };
        self.notify(transition);
        admission
    }

    fn claim_probe_locked(&self, core: &mut BreakerCore) -> Admission<'_> {
        match core.claim_probe() {
            Some(token) => Admission::Call {
                generation: core.generation,
                _probe: Some(ProbeGuard {
                    breaker: self,
                    token,
                }),
            },
            // Probe outstanding: behave as if still open
            None => Admission::Reject {
                retry_after: Duration::ZERO,
            },
        }
    }

    fn record_outcome(&self, generation: u64, duration: Duration, outcome: CallOutcome) {
        self.metrics.record_call(duration, outcome);
        if let Some(listener) = &self.listener {
            listener.on_call_outcome(&self.name, duration, outcome);
        }

        let transition = {
            let mut core = self.core.lock();
            if outcome == CallOutcome::Failure {
                core.last_failure_at = Some(Utc::now());
            }

            if core.generation != generation {
                None
            } else {
                match (core.state, outcome) {
                    (CircuitState::Closed, CallOutcome::Failure) => {
                        core.failure_count += 1;
                        if core.failure_count >= self.config.failure_threshold {
                            self.transition_locked(&mut core, CircuitState::Open)
                        } else {
                            None
                        }
                    }
                    (CircuitState::HalfOpen, CallOutcome::Failure) => {
                        core.failure_count += 1;
                        self.transition_locked(&mut core, CircuitState::Open)
                    }
                    (CircuitState::Closed, _) => {
                        core.failure_count = 0;
                        core.success_count = core.success_count.saturating_add(1);
                        None
                    }
                    (CircuitState::HalfOpen, _) => {
                        core.success_count += 1;
                        if core.success_count >= self.config.half_open_max_attempts {
                            self.transition_locked(&mut core, CircuitState::Closed)
                        } else {
                            None
                        }
                    }
                    (CircuitState::Open, _) => None,
                }
            }
        };
        self.notify(transition);
    }

    fn transition_locked(&self, core: &mut BreakerCore, to: CircuitState) -> Option<Transition> {
        let from = core.state;
        core.state = to;
        core.failure_count = 0;
        core.success_count = 0;
        core.last_state_change = Instant::now();
        core.last_state_change_at = Utc::now();
        core.generation += 1;
        core.probe_owner = None;

        (from != to).then_some(Transition { from, to })
    }

    fn notify(&self, transition: Option<Transition>) {
        if let (Some(listener), Some(transition)) = (&self.listener, transition) {
            listener.on_state_transition(&self.name, transition.from, transition.to);
        }
    }

    async fn serve_fallback<T>(&self, fallback: Fallback<'_, T>) -> T {
        self.metrics.record_fallback();
        fallback.invoke().await
    }
}

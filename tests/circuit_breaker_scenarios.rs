//! End-to-end breaker behavior through the registry

mod common;

use common::{breaker_config, init_test_logging, registry_with, CallCounter};
use resilience_core::resilience::{CircuitBreaker, CircuitBreakerError, CircuitState, Fallback};
use resilience_core::{ResilienceError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const SERVICE: &str = "inventory";

async fn failing(counter: &CallCounter) -> Result<&'static str> {
    counter.hit();
    Err(ResilienceError::connection(SERVICE, "connection reset"))
}

async fn succeeding(counter: &CallCounter) -> Result<&'static str> {
    counter.hit();
    Ok("in stock")
}

#[tokio::test]
async fn test_threshold_cooldown_and_probe() {
    init_test_logging();
    let registry = registry_with(&[SERVICE], &breaker_config(3, 1_000));
    let counter = CallCounter::default();

    for _ in 0..3 {
        let result = registry.execute(SERVICE, || failing(&counter), None).await;
        assert!(matches!(result, Err(ResilienceError::Connection { .. })));
    }
    assert_eq!(counter.count(), 3);
    assert!(!registry.is_available(SERVICE));

    // Fourth call inside the cool-down is short-circuited
    let result = registry.execute(SERVICE, || succeeding(&counter), None).await;
    assert!(matches!(result, Err(ResilienceError::CircuitBreakerOpen { .. })));
    assert_eq!(counter.count(), 3);

    sleep(Duration::from_millis(1_050)).await;

    // Fifth call after the cool-down is the probe
    let result = registry.execute(SERVICE, || succeeding(&counter), None).await;
    assert_eq!(result.unwrap(), "in stock");
    assert_eq!(counter.count(), 4);

    let breaker = registry.get_circuit_breaker(SERVICE).unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.stats().failure_count, 0);
}

#[tokio::test]
async fn test_failed_probe_restarts_cooldown() {
    let registry = registry_with(&[SERVICE], &breaker_config(1, 100));
    let counter = CallCounter::default();

    let _ = registry.execute(SERVICE, || failing(&counter), None).await;
    sleep(Duration::from_millis(120)).await;

    let _ = registry.execute(SERVICE, || failing(&counter), None).await;
    let breaker = registry.get_circuit_breaker(SERVICE).unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.retry_after() > Duration::from_millis(50));

    let result = registry.execute(SERVICE, || succeeding(&counter), None).await;
    assert!(matches!(result, Err(ResilienceError::CircuitBreakerOpen { .. })));
    assert_eq!(counter.count(), 2);
}

#[tokio::test]
async fn test_forced_open_always_serves_fallback() {
    let registry = registry_with(&[SERVICE], &breaker_config(5, 10_000));
    registry.mark_unhealthy(SERVICE, "maintenance window");
    let counter = CallCounter::default();

    for _ in 0..10 {
        let value = registry
            .execute(
                SERVICE,
                || succeeding(&counter),
                Some(Fallback::value("unknown")),
            )
            .await
            .unwrap();
        assert_eq!(value, "unknown");
    }
    assert_eq!(counter.count(), 0);

    let result = registry.execute(SERVICE, || succeeding(&counter), None).await;
    assert!(matches!(result, Err(ResilienceError::CircuitBreakerOpen { .. })));
}

#[tokio::test]
async fn test_fallback_does_not_mask_application_errors() {
    let registry = registry_with(&[SERVICE], &breaker_config(1, 10_000));

    let result: Result<u32> = registry
        .execute(
            SERVICE,
            || async { Err(ResilienceError::operation(SERVICE, "sku does not exist")) },
            Some(Fallback::value(0)),
        )
        .await;

    assert!(matches!(result, Err(ResilienceError::Operation { .. })));
    assert!(registry.is_available(SERVICE));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawned_callers_share_a_single_probe() {
    let breaker = Arc::new(CircuitBreaker::new(SERVICE, breaker_config(1, 50)));
    let _ = breaker
        .call(|| async { Err::<(), _>(ResilienceError::connection(SERVICE, "down")) })
        .await;
    sleep(Duration::from_millis(70)).await;

    let counter = Arc::new(CallCounter::default());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let breaker = Arc::clone(&breaker);
        let counter = Arc::clone(&counter);
        handles.push(tokio::spawn(async move {
            breaker
                .call(|| async {
                    counter.hit();
                    sleep(Duration::from_millis(100)).await;
                    Ok::<_, ResilienceError>(())
                })
                .await
        }));
    }

    let mut rejected = 0;
    for handle in handles {
        if let Err(CircuitBreakerError::CircuitOpen { retry_after, .. }) = handle.await.unwrap() {
            assert_eq!(retry_after, Duration::ZERO);
            rejected += 1;
        }
    }

    assert_eq!(counter.count(), 1);
    assert_eq!(rejected, 7);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_health_report_tracks_state_changes() {
    let registry = registry_with(&[SERVICE], &breaker_config(2, 10_000));
    let counter = CallCounter::default();

    let _ = registry.execute(SERVICE, || succeeding(&counter), None).await;
    assert_eq!(registry.health_report().health_score(), 1.0);

    let _ = registry.execute(SERVICE, || failing(&counter), None).await;
    let _ = registry.execute(SERVICE, || failing(&counter), None).await;

    let report = registry.service_report(SERVICE).unwrap();
    assert_eq!(report.breaker.state, CircuitState::Open);
    assert_eq!(report.breaker.metrics.total_calls, 3);
    assert_eq!(report.breaker.metrics.failure_count, 2);
    assert!(report.last_error.unwrap().contains("connection reset"));
}

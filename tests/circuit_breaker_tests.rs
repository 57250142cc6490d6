//! Circuit breaker state-machine tests

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use signal_service::breaker::{
    BreakerClass, BreakerConfig, BreakerRegistry, BreakerState, CallOptions, CircuitBreaker,
};
use signal_service::errors::SignalError;

fn breaker(failure_threshold: u64, timeout: Duration) -> CircuitBreaker {
    CircuitBreaker::new(
        "test",
        BreakerConfig {
            failure_threshold,
            timeout_duration: timeout,
            op_timeout: Duration::from_millis(500),
            ..BreakerConfig::default()
        },
    )
}

async fn record_failure(cb: &CircuitBreaker) {
    let _ = cb
        .call::<u32, _, _>(|| async { Err(SignalError::greeks("induced failure")) })
        .await;
}

async fn record_success(cb: &CircuitBreaker) {
    cb.call(|| async { Ok(1u32) }).await.expect("should pass");
}

#[tokio::test]
async fn test_breaker_starts_closed() {
    let cb = breaker(3, Duration::from_secs(60));
    assert_eq!(cb.state(), BreakerState::Closed, "breaker should start closed");
}

#[tokio::test]
async fn test_default_class_trips_after_five_failures() {
    let cb = CircuitBreaker::for_class(BreakerClass::Default);

    for i in 0..5 {
        assert_eq!(
            cb.state(),
            BreakerState::Closed,
            "should remain closed before failure {i}"
        );
        record_failure(&cb).await;
    }
    assert_eq!(cb.state(), BreakerState::Open, "should open at threshold");

    // Sixth call is rejected immediately.
    let err = cb.call(|| async { Ok(0u32) }).await.unwrap_err();
    assert_matches!(err, SignalError::CircuitOpen { .. });
    assert_eq!(cb.metrics().rejected_requests, 1);
}

#[tokio::test]
async fn test_no_execution_while_open() {
    let cb = breaker(1, Duration::from_secs(60));
    record_failure(&cb).await;

    let executed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    for _ in 0..3 {
        let flag = Arc::clone(&executed);
        let _ = cb
            .call(|| async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(1u32)
            })
            .await;
    }
    assert!(
        !executed.load(std::sync::atomic::Ordering::SeqCst),
        "no call may execute while the breaker is open"
    );
}

#[tokio::test]
async fn test_half_open_after_timeout_then_two_successes_close() {
    let cb = breaker(1, Duration::from_millis(80));
    record_failure(&cb).await;
    assert_eq!(cb.state(), BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(100)).await;

    // First call after the timeout is the probe and enters half-open.
    record_success(&cb).await;
    assert_eq!(cb.state(), BreakerState::HalfOpen);

    record_success(&cb).await;
    assert_eq!(cb.state(), BreakerState::Closed, "two successes should close");
}

#[tokio::test]
async fn test_half_open_failure_returns_to_open() {
    let cb = breaker(1, Duration::from_millis(50));
    record_failure(&cb).await;
    tokio::time::sleep(Duration::from_millis(70)).await;

    record_success(&cb).await;
    assert_eq!(cb.state(), BreakerState::HalfOpen);

    record_failure(&cb).await;
    assert_eq!(cb.state(), BreakerState::Open, "any half-open failure reopens");
}

#[tokio::test]
async fn test_half_open_entry_resets_counters() {
    let cb = breaker(2, Duration::from_millis(50));
    record_failure(&cb).await;
    record_failure(&cb).await;
    assert_eq!(cb.state(), BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(70)).await;
    record_success(&cb).await;
    assert_eq!(cb.state(), BreakerState::HalfOpen);

    // Counters were reset on entry; the probe is the only recorded call.
    let metrics = cb.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.failed_requests, 0);
}

#[tokio::test]
async fn test_open_with_fallback_value() {
    let cb = breaker(1, Duration::from_secs(60));
    record_failure(&cb).await;

    let value = cb
        .call_with(
            || async { Ok(0u32) },
            CallOptions {
                fallback_value: Some(99),
                cache_key: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(value, 99);
}

#[tokio::test]
async fn test_open_with_cached_value_preferred_over_rejection() {
    let cb = breaker(1, Duration::from_secs(60));

    let warm = cb
        .call_with(
            || async { Ok(vec![0.42, 0.43]) },
            CallOptions::cached("greeks:NIFTY:ATM"),
        )
        .await
        .unwrap();
    assert_eq!(warm.len(), 2);

    record_failure(&cb).await;
    assert_eq!(cb.state(), BreakerState::Open);

    let degraded: Vec<f64> = cb
        .call_with(
            || async { Ok(vec![9.9]) },
            CallOptions::cached("greeks:NIFTY:ATM"),
        )
        .await
        .unwrap();
    assert_eq!(degraded, vec![0.42, 0.43]);

    // A different key has nothing cached and must reject.
    let err = cb
        .call_with(
            || async { Ok(vec![1.0]) },
            CallOptions::<Vec<f64>>::cached("greeks:BANKNIFTY:ATM"),
        )
        .await
        .unwrap_err();
    assert_matches!(err, SignalError::CircuitOpen { .. });
}

#[tokio::test]
async fn test_operation_timeout_is_enforced_and_counted() {
    let cb = CircuitBreaker::new(
        "deadline",
        BreakerConfig {
            failure_threshold: 2,
            op_timeout: Duration::from_millis(30),
            ..BreakerConfig::default()
        },
    );

    for _ in 0..2 {
        let err = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(1u32)
            })
            .await
            .unwrap_err();
        assert_matches!(err, SignalError::Timeout { .. });
    }
    assert_eq!(cb.state(), BreakerState::Open, "timeouts count as failures");
    assert_eq!(cb.metrics().failed_requests, 2);
}

#[tokio::test]
async fn test_success_resets_are_reflected_in_metrics() {
    let cb = breaker(10, Duration::from_secs(60));
    record_success(&cb).await;
    record_failure(&cb).await;
    record_success(&cb).await;

    let metrics = cb.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.successful_requests, 2);
    assert_eq!(metrics.failed_requests, 1);
    assert!((metrics.failure_rate - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_reset_returns_to_initial_state() {
    let cb = breaker(1, Duration::from_secs(60));
    record_failure(&cb).await;
    assert_eq!(cb.state(), BreakerState::Open);

    cb.reset();
    assert_eq!(cb.state(), BreakerState::Closed);
    assert_eq!(cb.metrics().total_requests, 0);
    assert_eq!(cb.metrics().cached_fallbacks, 0);
}

#[tokio::test]
async fn test_registry_has_all_four_classes() {
    let registry = BreakerRegistry::new();
    let metrics = registry.all_metrics();
    assert_eq!(metrics.len(), 4);

    assert_eq!(
        registry.get(BreakerClass::Default).config().failure_threshold,
        5
    );
    assert_eq!(
        registry.get(BreakerClass::Individual).config().failure_threshold,
        10
    );
    assert_eq!(
        registry.get(BreakerClass::Vectorized).config().timeout_duration,
        Duration::from_secs(30)
    );
    assert_eq!(
        registry.get(BreakerClass::Bulk).config().timeout_duration,
        Duration::from_secs(45)
    );
}

#[tokio::test]
async fn test_registry_reset_all() {
    let registry = BreakerRegistry::new();
    let vectorized = registry.get(BreakerClass::Vectorized);
    for _ in 0..3 {
        record_failure(&vectorized).await;
    }
    assert_eq!(vectorized.state(), BreakerState::Open);

    registry.reset_all();
    assert_eq!(registry.get(BreakerClass::Vectorized).state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_concurrent_failures_trip_the_breaker() {
    let cb = Arc::new(breaker(10, Duration::from_secs(60)));
    let mut handles = Vec::new();
    for _ in 0..5 {
        let cb = Arc::clone(&cb);
        handles.push(tokio::spawn(async move {
            for _ in 0..3 {
                let _ = cb
                    .call::<u32, _, _>(|| async { Err(SignalError::greeks("boom")) })
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    // The rolling-window rate trips well before all 15 failures land;
    // late calls are rejected rather than recorded.
    assert_eq!(cb.state(), BreakerState::Open);
    let metrics = cb.metrics();
    assert!(metrics.failed_requests >= 5, "failures recorded under contention");
    assert_eq!(
        metrics.failed_requests + metrics.rejected_requests,
        15,
        "every call either recorded or rejected"
    );
}

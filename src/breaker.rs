//! Circuit breaker for computation and upstream calls
//!
//! Three states gate every compute path:
//! - CLOSED: normal operation, all requests pass through
//! - OPEN: failing, reject immediately with cached/fallback values
//! - HALF_OPEN: testing recovery with a limited number of probes
//!
//! Four configuration classes cover the individual, vectorized and bulk
//! pricing paths. Breaker state mutates only through its own transition
//! rules; readers take a short lock.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{Result, SignalError};

/// Fallback cache TTL while the breaker is open.
const FALLBACK_CACHE_TTL: Duration = Duration::from_secs(300);
/// Minimum rolling-window sample size before the failure rate is meaningful.
const MIN_RATE_SAMPLES: usize = 5;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Configuration classes for the calculation paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerClass {
    Default,
    Individual,
    Vectorized,
    Bulk,
}

impl BreakerClass {
    pub const ALL: [BreakerClass; 4] = [
        BreakerClass::Default,
        BreakerClass::Individual,
        BreakerClass::Vectorized,
        BreakerClass::Bulk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Individual => "individual",
            Self::Vectorized => "vectorized",
            Self::Bulk => "bulk",
        }
    }
}

impl fmt::Display for BreakerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning parameters.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Cumulative failures to trip the breaker.
    pub failure_threshold: u64,
    /// Failure rate over the rolling window to trip.
    pub failure_rate_threshold: f64,
    /// How long the breaker stays open before probing.
    pub timeout_duration: Duration,
    /// Window for the failure-rate calculation.
    pub rolling_window: Duration,
    /// Probe budget in the half-open state.
    pub half_open_max_calls: u64,
    /// Duration above which a call counts as slow.
    pub slow_call_threshold: Duration,
    /// Slow-call rate to trip.
    pub slow_call_rate_threshold: f64,
    /// Deadline enforced on each wrapped call.
    pub op_timeout: Duration,
    /// Gate disabled: calls still run (with timeout and recording).
    pub enabled: bool,
}

impl BreakerConfig {
    fn base() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            timeout_duration: Duration::from_secs(60),
            rolling_window: Duration::from_secs(60),
            half_open_max_calls: 3,
            slow_call_threshold: Duration::from_secs(5),
            slow_call_rate_threshold: 0.8,
            op_timeout: Duration::from_secs(1),
            enabled: true,
        }
    }

    /// Specialized configuration per calculation class.
    pub fn for_class(class: BreakerClass) -> Self {
        let base = Self::base();
        match class {
            BreakerClass::Default => base,
            BreakerClass::Individual => Self {
                failure_threshold: 10,
                op_timeout: Duration::from_secs(2),
                ..base
            },
            BreakerClass::Vectorized => Self {
                failure_threshold: 3,
                timeout_duration: Duration::from_secs(30),
                op_timeout: Duration::from_secs(15),
                ..base
            },
            BreakerClass::Bulk => Self {
                failure_threshold: 2,
                timeout_duration: Duration::from_secs(45),
                op_timeout: Duration::from_secs(45),
                ..base
            },
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::base()
    }
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    at: Instant,
    ok: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    total: u64,
    success: u64,
    failed: u64,
    rejected: u64,
    slow: u64,
}

struct Inner {
    state: BreakerState,
    state_entered_at: Instant,
    counters: Counters,
    recent: VecDeque<CallRecord>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            state_entered_at: Instant::now(),
            counters: Counters::default(),
            recent: VecDeque::new(),
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.counters.total == 0 {
            0.0
        } else {
            self.counters.failed as f64 / self.counters.total as f64
        }
    }

    fn slow_call_rate(&self) -> f64 {
        if self.counters.total == 0 {
            0.0
        } else {
            self.counters.slow as f64 / self.counters.total as f64
        }
    }

    fn success_rate(&self) -> f64 {
        1.0 - self.failure_rate()
    }

    fn prune_window(&mut self, window: Duration) {
        let now = Instant::now();
        while let Some(front) = self.recent.front() {
            if now.duration_since(front.at) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, ok: bool, duration: Duration, config: &BreakerConfig) {
        self.counters.total += 1;
        if ok {
            self.counters.success += 1;
        } else {
            self.counters.failed += 1;
        }
        if duration >= config.slow_call_threshold {
            self.counters.slow += 1;
        }
        self.recent.push_back(CallRecord {
            at: Instant::now(),
            ok,
        });
        self.prune_window(config.rolling_window);
    }

    fn should_open(&self, config: &BreakerConfig) -> bool {
        if self.counters.failed >= config.failure_threshold {
            return true;
        }
        if self.recent.len() >= MIN_RATE_SAMPLES {
            let failures = self.recent.iter().filter(|c| !c.ok).count();
            if failures as f64 / self.recent.len() as f64 >= config.failure_rate_threshold {
                return true;
            }
        }
        self.counters.total > 0 && self.slow_call_rate() >= config.slow_call_rate_threshold
    }

    fn should_close(&self) -> bool {
        self.counters.success >= 2 && self.success_rate() >= 0.8
    }
}

#[derive(Clone)]
struct FallbackEntry {
    value: serde_json::Value,
    stored_at: Instant,
}

/// Gate decision taken under the state lock.
enum Gate {
    Proceed,
    Reject,
}

/// Options for a single gated call.
pub struct CallOptions<T> {
    /// Returned while the breaker is open instead of rejecting.
    pub fallback_value: Option<T>,
    /// Key under which successful results are cached for degraded answers.
    pub cache_key: Option<String>,
}

impl<T> Default for CallOptions<T> {
    fn default() -> Self {
        Self {
            fallback_value: None,
            cache_key: None,
        }
    }
}

impl<T> CallOptions<T> {
    pub fn cached(cache_key: impl Into<String>) -> Self {
        Self {
            fallback_value: None,
            cache_key: Some(cache_key.into()),
        }
    }
}

/// Circuit breaker with sliding-window failure tracking and a
/// per-fingerprint fallback cache for degraded answers.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    fallback_cache: DashMap<String, FallbackEntry>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        debug!(breaker = %name, "Circuit breaker initialized");
        Self {
            name,
            config,
            inner: Mutex::new(Inner::new()),
            fallback_cache: DashMap::new(),
        }
    }

    pub fn for_class(class: BreakerClass) -> Self {
        Self::new(class.as_str(), BreakerConfig::for_class(class))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Execute a call through the breaker with default options.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.call_with(op, CallOptions::default()).await
    }

    /// Execute a call through the breaker.
    ///
    /// While OPEN the call is rejected unless a fallback value or a cached
    /// value under `cache_key` is available; a stale cached value is
    /// preferred over rejection.
    pub async fn call_with<T, F, Fut>(&self, op: F, options: CallOptions<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enabled {
            return self.run_recorded(op).await;
        }

        let gate = {
            let mut inner = self.inner.lock();
            match inner.state {
                BreakerState::Closed => Gate::Proceed,
                BreakerState::Open => {
                    if inner.state_entered_at.elapsed() >= self.config.timeout_duration {
                        self.transition_to_half_open(&mut inner);
                        Gate::Proceed
                    } else {
                        inner.counters.rejected += 1;
                        Gate::Reject
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.counters.total >= self.config.half_open_max_calls {
                        inner.counters.rejected += 1;
                        Gate::Reject
                    } else {
                        Gate::Proceed
                    }
                }
            }
        };

        match gate {
            Gate::Proceed => {
                let result = self.run_recorded(op).await;
                if let (Ok(value), Some(key)) = (&result, &options.cache_key) {
                    self.store_fallback(key, value);
                }
                result
            }
            Gate::Reject => self.degraded_answer(options),
        }
    }

    async fn run_recorded<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.config.op_timeout, op()).await {
            Ok(Ok(value)) => {
                self.on_result(true, start.elapsed());
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_result(false, start.elapsed());
                Err(err)
            }
            Err(_) => {
                let elapsed = start.elapsed();
                self.on_result(false, elapsed);
                Err(SignalError::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    limit_ms: self.config.op_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn on_result(&self, ok: bool, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.record(ok, duration, &self.config);
        match (inner.state, ok) {
            (BreakerState::HalfOpen, true) => {
                if inner.should_close() {
                    self.transition_to_closed(&mut inner);
                }
            }
            (BreakerState::HalfOpen, false) => {
                self.transition_to_open(&mut inner);
            }
            (BreakerState::Closed, _) => {
                if inner.should_open(&self.config) {
                    self.transition_to_open(&mut inner);
                }
            }
            (BreakerState::Open, _) => {}
        }
    }

    fn degraded_answer<T>(&self, options: CallOptions<T>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if let Some(value) = options.fallback_value {
            warn!(breaker = %self.name, "Circuit breaker OPEN: returning fallback value");
            return Ok(value);
        }

        if let Some(key) = &options.cache_key {
            if let Some(entry) = self.fallback_cache.get(key) {
                let stale = entry.stored_at.elapsed() > FALLBACK_CACHE_TTL;
                if let Ok(value) = serde_json::from_value(entry.value.clone()) {
                    warn!(
                        breaker = %self.name,
                        stale,
                        "Circuit breaker OPEN: returning cached value"
                    );
                    return Ok(value);
                }
            }
        }

        let (failure_rate, remaining) = {
            let inner = self.inner.lock();
            let remaining = self
                .config
                .timeout_duration
                .saturating_sub(inner.state_entered_at.elapsed());
            (inner.failure_rate(), remaining)
        };
        Err(SignalError::CircuitOpen {
            message: format!(
                "Circuit breaker '{}' is open: calculation service temporarily unavailable",
                self.name
            ),
            details: Some(serde_json::json!({
                "state": "open",
                "failure_rate": failure_rate,
                "time_until_half_open_secs": remaining.as_secs_f64(),
            })),
        })
    }

    fn store_fallback<T: Serialize>(&self, key: &str, value: &T) {
        if let Ok(json) = serde_json::to_value(value) {
            self.fallback_cache.insert(
                key.to_string(),
                FallbackEntry {
                    value: json,
                    stored_at: Instant::now(),
                },
            );
        }
    }

    fn transition_to_open(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.state_entered_at = Instant::now();
        warn!(
            breaker = %self.name,
            failure_rate = inner.failure_rate(),
            "Circuit breaker transitioned to OPEN"
        );
    }

    fn transition_to_half_open(&self, inner: &mut Inner) {
        inner.state = BreakerState::HalfOpen;
        inner.state_entered_at = Instant::now();
        inner.counters = Counters::default();
        info!(breaker = %self.name, "Circuit breaker transitioned to HALF_OPEN: testing recovery");
    }

    fn transition_to_closed(&self, inner: &mut Inner) {
        inner.state = BreakerState::Closed;
        inner.state_entered_at = Instant::now();
        inner.counters.failed = 0;
        inner.counters.slow = 0;
        info!(breaker = %self.name, "Circuit breaker transitioned to CLOSED: service recovered");
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.lock();
        BreakerMetrics {
            state: inner.state,
            total_requests: inner.counters.total,
            successful_requests: inner.counters.success,
            failed_requests: inner.counters.failed,
            rejected_requests: inner.counters.rejected,
            slow_requests: inner.counters.slow,
            failure_rate: inner.failure_rate(),
            slow_call_rate: inner.slow_call_rate(),
            success_rate: inner.success_rate(),
            time_in_state_secs: inner.state_entered_at.elapsed().as_secs_f64(),
            window_samples: inner.recent.len(),
            cached_fallbacks: self.fallback_cache.len(),
        }
    }

    /// Reset to the initial state and drop cached fallbacks.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new();
        self.fallback_cache.clear();
        info!(breaker = %self.name, "Circuit breaker reset to initial state");
    }

    /// Drop rolling-window samples that fell out of the window.
    /// Called by the background maintenance task.
    pub fn compact_window(&self) {
        let mut inner = self.inner.lock();
        let window = self.config.rolling_window;
        inner.prune_window(window);
    }
}

/// Metrics snapshot for one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub slow_requests: u64,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
    pub success_rate: f64,
    pub time_in_state_secs: f64,
    pub window_samples: usize,
    pub cached_fallbacks: usize,
}

/// Registry of breakers keyed by configuration class, built once at
/// service init.
pub struct BreakerRegistry {
    breakers: DashMap<BreakerClass, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        let breakers = DashMap::new();
        for class in BreakerClass::ALL {
            breakers.insert(class, Arc::new(CircuitBreaker::for_class(class)));
        }
        info!("Circuit breaker registry initialized with {} classes", breakers.len());
        Self { breakers }
    }

    pub fn get(&self, class: BreakerClass) -> Arc<CircuitBreaker> {
        self.breakers
            .get(&class)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| {
                // Registry is fully populated at init; this only runs if a
                // class was removed at runtime.
                let breaker = Arc::new(CircuitBreaker::for_class(class));
                self.breakers.insert(class, Arc::clone(&breaker));
                breaker
            })
    }

    pub fn all_metrics(&self) -> Vec<(String, BreakerMetrics)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().metrics()))
            .collect()
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn compact_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().compact_window();
        }
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

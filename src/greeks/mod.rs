//! Vectorized Greeks calculation engine
//!
//! Bulk Black-Scholes-family pricing over option chains. The vectorized path
//! prepares flat input arrays once and runs every requested greek over the
//! batch on the compute pool, orders of magnitude faster than per-option
//! calls. Per-option failures degrade to missing values; batch failures
//! degrade to the per-option reference path outside production.

pub mod compute;
pub mod iv;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::breaker::{BreakerClass, BreakerRegistry, CallOptions};
use crate::config::{Environment, ModelConfig};
use crate::errors::{Result, SignalError};
use crate::models::{self, GreekKind};
use crate::timeutil::{self, time_to_expiry_years};
use crate::types::{InstrumentKey, OptionType};

pub use compute::ComputePool;

/// Per-option pricing input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRequest {
    pub strike: f64,
    #[serde(with = "expiry_serde")]
    pub expiry: DateTime<Utc>,
    pub option_type: OptionType,
    /// Known volatility; solved from `market_price` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_price: Option<f64>,
}

impl OptionRequest {
    pub fn new(strike: f64, expiry: DateTime<Utc>, option_type: OptionType) -> Self {
        Self {
            strike,
            expiry,
            option_type,
            volatility: None,
            market_price: None,
            underlying_price: None,
        }
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = Some(volatility);
        self
    }

    pub fn with_market_price(mut self, market_price: f64) -> Self {
        self.market_price = Some(market_price);
        self
    }

    pub fn with_underlying_price(mut self, underlying_price: f64) -> Self {
        self.underlying_price = Some(underlying_price);
        self
    }
}

mod expiry_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        expiry: &DateTime<Utc>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&expiry.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        timeutil::parse_expiry(&raw).map_err(serde::de::Error::custom)
    }
}

/// Greeks for one option; out-of-band values are reported as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GreeksResult {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
    pub iv: Option<f64>,
}

impl GreeksResult {
    /// All greeks missing; used when one option fails inside a batch.
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: GreekKind) -> Option<f64> {
        match kind {
            GreekKind::Delta => self.delta,
            GreekKind::Gamma => self.gamma,
            GreekKind::Theta => self.theta,
            GreekKind::Vega => self.vega,
            GreekKind::Rho => self.rho,
        }
    }

    fn set(&mut self, kind: GreekKind, value: Option<f64>) {
        match kind {
            GreekKind::Delta => self.delta = value,
            GreekKind::Gamma => self.gamma = value,
            GreekKind::Theta => self.theta = value,
            GreekKind::Vega => self.vega = value,
            GreekKind::Rho => self.rho = value,
        }
    }
}

/// Outbound per-option signal envelope for downstream subscribers.
/// Monetary values are in the underlying's quote currency; cross-currency
/// consumers convert before combining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub instrument: InstrumentKey,
    pub greeks: GreeksResult,
    pub underlying_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theoretical_price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl SignalEnvelope {
    pub fn new(
        instrument: InstrumentKey,
        greeks: GreeksResult,
        underlying_price: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument,
            greeks,
            underlying_price,
            theoretical_price: None,
            timestamp,
        }
    }

    pub fn with_theoretical_price(mut self, theoretical_price: f64) -> Self {
        self.theoretical_price = Some(theoretical_price);
        self
    }
}

/// Which path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeMethod {
    Vectorized,
    Fallback,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainPerf {
    pub elapsed_ms: f64,
    pub options_processed: usize,
    pub options_per_sec: f64,
}

impl ChainPerf {
    fn from_elapsed(elapsed_ms: f64, options: usize) -> Self {
        let options_per_sec = if elapsed_ms > 0.0 {
            options as f64 / (elapsed_ms / 1000.0)
        } else {
            0.0
        };
        Self {
            elapsed_ms,
            options_processed: options,
            options_per_sec,
        }
    }
}

/// Result of pricing one chain against a common underlying price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResult {
    pub results: Vec<GreeksResult>,
    pub perf: ChainPerf,
    pub method: ComputeMethod,
}

impl ChainResult {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            perf: ChainPerf::default(),
            method: ComputeMethod::None,
        }
    }
}

/// One underlying-price group within a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkGroup {
    pub underlying_price: f64,
    pub chain: ChainResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkResult {
    pub groups: Vec<BulkGroup>,
    pub perf: ChainPerf,
}

/// Engine performance counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    pub vectorized_calls: u64,
    pub fallback_calls: u64,
    pub total_options_processed: u64,
    pub avg_vectorized_time_ms: f64,
    pub avg_fallback_time_ms: f64,
}

/// Flat input arrays for the batch kernels.
struct PricingArrays {
    strikes: Vec<f64>,
    times_to_expiry: Vec<f64>,
    volatilities: Vec<f64>,
    solved_iv: Vec<Option<f64>>,
    option_types: Vec<OptionType>,
    underlying_price: f64,
}

pub struct GreeksEngine {
    model: Arc<ModelConfig>,
    pool: Arc<ComputePool>,
    breakers: Arc<BreakerRegistry>,
    environment: Environment,
    metrics: Mutex<EngineMetrics>,
}

impl GreeksEngine {
    pub fn new(
        model: Arc<ModelConfig>,
        pool: Arc<ComputePool>,
        breakers: Arc<BreakerRegistry>,
        environment: Environment,
    ) -> Self {
        info!(
            model = %model.model(),
            pool_size = pool.pool_size(),
            environment = %environment,
            "Vectorized Greeks engine initialized"
        );
        Self {
            model,
            pool,
            breakers,
            environment,
            metrics: Mutex::new(EngineMetrics::default()),
        }
    }

    /// Price a chain of options against a common underlying price.
    ///
    /// Returns one result per input, preserving order. Engine-internal
    /// failures degrade to the per-option path when `allow_fallback` and the
    /// environment permits it; production surfaces the error.
    pub async fn price_chain(
        &self,
        options: &[OptionRequest],
        underlying_price: f64,
        greeks: &[GreekKind],
        allow_fallback: bool,
    ) -> Result<ChainResult> {
        if options.is_empty() {
            return Ok(ChainResult::empty());
        }
        self.validate_inputs(options, underlying_price)?;
        let greeks = resolve_greeks(greeks);

        let cache_key = format!(
            "vectorized_chain:{}:{}:{}",
            options.len(),
            underlying_price,
            greeks
                .iter()
                .map(GreekKind::as_str)
                .collect::<Vec<_>>()
                .join(",")
        );

        let breaker = self.breakers.get(BreakerClass::Vectorized);
        let outcome = breaker
            .call_with(
                || self.vectorized_chain(options, underlying_price, &greeks),
                CallOptions::cached(cache_key),
            )
            .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(err) if allow_fallback && self.environment.allows_engine_fallback() => {
                warn!(
                    error = %err,
                    options = options.len(),
                    "Vectorized calculation failed, falling back to per-option mode"
                );
                self.price_chain_per_option(options, underlying_price, &greeks)
                    .await
            }
            Err(err @ SignalError::CircuitOpen { .. }) => Err(err),
            Err(err) => Err(SignalError::greeks(format!(
                "Vectorized Greeks calculation failed: {err}. Fallback disabled for production reliability."
            ))),
        }
    }

    /// Reference per-option path; also the fallback for the vectorized path.
    pub async fn price_chain_per_option(
        &self,
        options: &[OptionRequest],
        underlying_price: f64,
        greeks: &[GreekKind],
    ) -> Result<ChainResult> {
        if options.is_empty() {
            return Ok(ChainResult::empty());
        }
        self.validate_inputs(options, underlying_price)?;
        let greeks = resolve_greeks(greeks);

        let start = Instant::now();
        let now = Utc::now();
        let breaker = self.breakers.get(BreakerClass::Individual);
        let mut results = Vec::with_capacity(options.len());

        for option in options {
            let outcome = breaker
                .call(|| async { self.single_option(option, underlying_price, &greeks, now) })
                .await;
            // One failed option never poisons the batch.
            results.push(outcome.unwrap_or_else(|_| GreeksResult::missing()));
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.record_run(ComputeMethod::Fallback, options.len(), elapsed_ms);
        warn!(
            options = options.len(),
            elapsed_ms, "Per-option calculation completed"
        );

        Ok(ChainResult {
            results,
            perf: ChainPerf::from_elapsed(elapsed_ms, options.len()),
            method: ComputeMethod::Fallback,
        })
    }

    /// Price options carrying their own underlying prices, grouped per
    /// underlying and wrapped by the bulk breaker.
    pub async fn price_bulk(&self, options: &[OptionRequest]) -> Result<BulkResult> {
        if options.is_empty() {
            return Ok(BulkResult {
                groups: Vec::new(),
                perf: ChainPerf::default(),
            });
        }

        let mut group_index: FxHashMap<u64, usize> = FxHashMap::default();
        let mut groups: Vec<(f64, Vec<OptionRequest>)> = Vec::new();
        for option in options {
            let underlying = option.underlying_price.ok_or_else(|| {
                SignalError::validation("Bulk pricing requires underlying_price on every option")
            })?;
            let slot = *group_index.entry(underlying.to_bits()).or_insert_with(|| {
                groups.push((underlying, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(option.clone());
        }

        let breaker = self.breakers.get(BreakerClass::Bulk);
        breaker
            .call(|| async {
                let start = Instant::now();
                let mut results = Vec::with_capacity(groups.len());
                for (underlying, members) in &groups {
                    let chain = self
                        .price_chain(members, *underlying, &GreekKind::ALL, true)
                        .await?;
                    results.push(BulkGroup {
                        underlying_price: *underlying,
                        chain,
                    });
                }
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                Ok(BulkResult {
                    perf: ChainPerf::from_elapsed(elapsed_ms, options.len()),
                    groups: results,
                })
            })
            .await
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics.lock().clone()
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock() = EngineMetrics::default();
    }

    fn validate_inputs(&self, options: &[OptionRequest], underlying_price: f64) -> Result<()> {
        if !(underlying_price > 0.0) {
            return Err(SignalError::validation(format!(
                "Underlying price must be positive, got {underlying_price}"
            )));
        }
        for (i, option) in options.iter().enumerate() {
            if !(option.strike > 0.0) {
                return Err(SignalError::validation(format!(
                    "Option {i}: strike must be positive, got {}",
                    option.strike
                )));
            }
            if let Some(sigma) = option.volatility {
                // Out-of-bounds volatility input is rejected before pricing.
                if !self.model.params().volatility_in_bounds(sigma) {
                    return Err(SignalError::validation(format!(
                        "Option {i}: volatility {sigma} outside configured bounds [{}, {}]",
                        self.model.params().volatility_min,
                        self.model.params().volatility_max
                    )));
                }
            }
        }
        Ok(())
    }

    async fn vectorized_chain(
        &self,
        options: &[OptionRequest],
        underlying_price: f64,
        greeks: &[GreekKind],
    ) -> Result<ChainResult> {
        let start = Instant::now();
        let arrays_input: Vec<OptionRequest> = options.to_vec();
        let greeks_owned: Vec<GreekKind> = greeks.to_vec();
        let model = self.model.model();
        let params = *self.model.params();

        let results = self
            .pool
            .run(move || {
                let arrays = prepare_arrays(&arrays_input, underlying_price, model, &params);
                run_kernels(&arrays, &greeks_owned, model, &params)
            })
            .await?;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.record_run(ComputeMethod::Vectorized, options.len(), elapsed_ms);
        info!(
            options = options.len(),
            elapsed_ms, "Vectorized calculation completed"
        );

        Ok(ChainResult {
            results,
            perf: ChainPerf::from_elapsed(elapsed_ms, options.len()),
            method: ComputeMethod::Vectorized,
        })
    }

    fn single_option(
        &self,
        option: &OptionRequest,
        underlying_price: f64,
        greeks: &[GreekKind],
        now: DateTime<Utc>,
    ) -> Result<GreeksResult> {
        let t = time_to_expiry_years(option.expiry, now);
        let sigma = option
            .volatility
            .unwrap_or(self.model.params().default_volatility);

        let mut result = GreeksResult {
            iv: option.volatility,
            ..GreeksResult::default()
        };
        for kind in greeks {
            let value = self.model.compute_greek(
                kind.as_str(),
                option.option_type.flag(),
                underlying_price,
                option.strike,
                t,
                sigma,
                None,
                None,
            )?;
            result.set(*kind, kind.validate(value));
        }
        Ok(result)
    }

    fn record_run(&self, method: ComputeMethod, options: usize, elapsed_ms: f64) {
        let mut metrics = self.metrics.lock();
        metrics.total_options_processed += options as u64;
        match method {
            ComputeMethod::Vectorized => {
                metrics.vectorized_calls += 1;
                let calls = metrics.vectorized_calls as f64;
                metrics.avg_vectorized_time_ms =
                    (metrics.avg_vectorized_time_ms * (calls - 1.0) + elapsed_ms) / calls;
            }
            ComputeMethod::Fallback => {
                metrics.fallback_calls += 1;
                let calls = metrics.fallback_calls as f64;
                metrics.avg_fallback_time_ms =
                    (metrics.avg_fallback_time_ms * (calls - 1.0) + elapsed_ms) / calls;
            }
            ComputeMethod::None => {}
        }
    }
}

fn resolve_greeks(greeks: &[GreekKind]) -> Vec<GreekKind> {
    if greeks.is_empty() {
        GreekKind::ALL.to_vec()
    } else {
        greeks.to_vec()
    }
}

fn prepare_arrays(
    options: &[OptionRequest],
    underlying_price: f64,
    model: models::PricingModel,
    params: &crate::config::ModelParams,
) -> PricingArrays {
    let now = Utc::now();
    let n = options.len();
    let mut arrays = PricingArrays {
        strikes: Vec::with_capacity(n),
        times_to_expiry: Vec::with_capacity(n),
        volatilities: Vec::with_capacity(n),
        solved_iv: Vec::with_capacity(n),
        option_types: Vec::with_capacity(n),
        underlying_price,
    };

    for option in options {
        let t = time_to_expiry_years(option.expiry, now);
        let (sigma, solved) = match option.volatility {
            Some(v) => (v, Some(v)),
            None => match option.market_price {
                Some(price) => {
                    let iv = iv::implied_volatility(
                        model,
                        price,
                        underlying_price,
                        option.strike,
                        t,
                        params.risk_free_rate,
                        params.dividend_yield,
                        option.option_type,
                        params.volatility_min,
                        params.volatility_max,
                    );
                    (iv.unwrap_or(params.default_volatility), iv)
                }
                None => (params.default_volatility, None),
            },
        };
        arrays.strikes.push(option.strike);
        arrays.times_to_expiry.push(t);
        arrays.volatilities.push(sigma);
        arrays.solved_iv.push(solved);
        arrays.option_types.push(option.option_type);
    }
    arrays
}

fn run_kernels(
    arrays: &PricingArrays,
    greeks: &[GreekKind],
    model: models::PricingModel,
    params: &crate::config::ModelParams,
) -> Vec<GreeksResult> {
    let n = arrays.strikes.len();
    let q = if model.uses_dividend_yield() {
        params.dividend_yield
    } else {
        0.0
    };

    let mut results: Vec<GreeksResult> = arrays
        .solved_iv
        .iter()
        .map(|iv| GreeksResult {
            iv: *iv,
            ..GreeksResult::default()
        })
        .collect();

    for kind in greeks {
        for i in 0..n {
            let value = models::greek(
                model,
                *kind,
                arrays.option_types[i],
                arrays.underlying_price,
                arrays.strikes[i],
                arrays.times_to_expiry[i],
                params.risk_free_rate,
                arrays.volatilities[i],
                q,
            );
            results[i].set(*kind, kind.validate(value));
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComputeSettings, ModelParams};
    use crate::models::PricingModel;

    fn test_engine(environment: Environment) -> GreeksEngine {
        let params = ModelParams {
            risk_free_rate: 0.05,
            dividend_yield: 0.0,
            default_volatility: 0.20,
            volatility_min: 0.01,
            volatility_max: 3.0,
        };
        GreeksEngine::new(
            Arc::new(ModelConfig::new(PricingModel::BlackScholes, params).unwrap()),
            Arc::new(ComputePool::new(&ComputeSettings::default())),
            Arc::new(BreakerRegistry::new()),
            environment,
        )
    }

    fn quarter_expiry() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::days(91)
    }

    #[tokio::test]
    async fn test_empty_chain_is_method_none() {
        let engine = test_engine(Environment::Test);
        let result = engine
            .price_chain(&[], 100.0, &GreekKind::ALL, true)
            .await
            .unwrap();
        assert!(result.results.is_empty());
        assert_eq!(result.method, ComputeMethod::None);
    }

    #[tokio::test]
    async fn test_chain_preserves_order_and_length() {
        let engine = test_engine(Environment::Test);
        let options: Vec<OptionRequest> = (0..20)
            .map(|i| {
                OptionRequest::new(
                    90.0 + f64::from(i),
                    quarter_expiry(),
                    if i % 2 == 0 {
                        OptionType::Call
                    } else {
                        OptionType::Put
                    },
                )
                .with_volatility(0.2)
            })
            .collect();

        let result = engine
            .price_chain(&options, 100.0, &GreekKind::ALL, true)
            .await
            .unwrap();
        assert_eq!(result.results.len(), options.len());
        assert_eq!(result.method, ComputeMethod::Vectorized);

        // Call deltas positive, put deltas negative, in input order.
        for (i, greeks) in result.results.iter().enumerate() {
            let delta = greeks.delta.expect("delta should be present");
            if i % 2 == 0 {
                assert!(delta > 0.0, "call delta at {i} was {delta}");
            } else {
                assert!(delta < 0.0, "put delta at {i} was {delta}");
            }
        }
    }

    #[tokio::test]
    async fn test_rejects_non_positive_underlying() {
        let engine = test_engine(Environment::Test);
        let options = vec![OptionRequest::new(100.0, quarter_expiry(), OptionType::Call)];
        let err = engine
            .price_chain(&options, 0.0, &GreekKind::ALL, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_rejects_out_of_bounds_input_volatility() {
        let engine = test_engine(Environment::Test);
        let options =
            vec![OptionRequest::new(100.0, quarter_expiry(), OptionType::Call).with_volatility(4.5)];
        let err = engine
            .price_chain(&options, 100.0, &GreekKind::ALL, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_solves_iv_from_market_price() {
        let engine = test_engine(Environment::Test);
        let sigma = 0.35;
        let price = models::price(
            PricingModel::BlackScholes,
            OptionType::Call,
            100.0,
            100.0,
            0.25,
            0.05,
            sigma,
            0.0,
        );
        let options =
            vec![OptionRequest::new(100.0, quarter_expiry(), OptionType::Call)
                .with_market_price(price)];

        let result = engine
            .price_chain(&options, 100.0, &GreekKind::ALL, true)
            .await
            .unwrap();
        let iv = result.results[0].iv.expect("iv should be solved");
        assert!((iv - sigma).abs() < 0.01, "solved iv was {iv}");
    }

    #[tokio::test]
    async fn test_per_option_path_reports_fallback_method() {
        let engine = test_engine(Environment::Test);
        let options =
            vec![OptionRequest::new(100.0, quarter_expiry(), OptionType::Call).with_volatility(0.2)];
        let result = engine
            .price_chain_per_option(&options, 100.0, &GreekKind::ALL)
            .await
            .unwrap();
        assert_eq!(result.method, ComputeMethod::Fallback);
        assert!(result.results[0].delta.is_some());
        assert_eq!(engine.metrics().fallback_calls, 1);
    }

    #[tokio::test]
    async fn test_bulk_groups_by_underlying() {
        let engine = test_engine(Environment::Test);
        let options = vec![
            OptionRequest::new(100.0, quarter_expiry(), OptionType::Call)
                .with_volatility(0.2)
                .with_underlying_price(100.0),
            OptionRequest::new(21500.0, quarter_expiry(), OptionType::Put)
                .with_volatility(0.15)
                .with_underlying_price(21500.0),
            OptionRequest::new(105.0, quarter_expiry(), OptionType::Call)
                .with_volatility(0.2)
                .with_underlying_price(100.0),
        ];

        let bulk = engine.price_bulk(&options).await.unwrap();
        assert_eq!(bulk.groups.len(), 2);
        assert_eq!(bulk.groups[0].underlying_price, 100.0);
        assert_eq!(bulk.groups[0].chain.results.len(), 2);
        assert_eq!(bulk.groups[1].chain.results.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_requires_underlying_price() {
        let engine = test_engine(Environment::Test);
        let options = vec![OptionRequest::new(100.0, quarter_expiry(), OptionType::Call)];
        let err = engine.price_bulk(&options).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_signal_envelope_wire_shape() {
        let instrument = InstrumentKey::parse("NSE@NIFTY@OPT@2026-08-27@CALL@21500").unwrap();
        let greeks = GreeksResult {
            delta: Some(0.52),
            iv: Some(0.18),
            ..GreeksResult::default()
        };
        let envelope = SignalEnvelope::new(instrument, greeks, 21480.0, Utc::now())
            .with_theoretical_price(151.2);

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["underlying_price"], 21480.0);
        assert_eq!(wire["theoretical_price"], 151.2);
        assert_eq!(wire["greeks"]["delta"], 0.52);
        assert!(wire["timestamp"].is_string() || wire["timestamp"].is_object());

        let bare = SignalEnvelope::new(
            InstrumentKey::parse("NSE@NIFTY@EQ").unwrap(),
            GreeksResult::default(),
            21480.0,
            Utc::now(),
        );
        let wire = serde_json::to_value(&bare).unwrap();
        assert!(wire.get("theoretical_price").is_none());
    }

    #[tokio::test]
    async fn test_metrics_reset() {
        let engine = test_engine(Environment::Test);
        let options =
            vec![OptionRequest::new(100.0, quarter_expiry(), OptionType::Call).with_volatility(0.2)];
        engine
            .price_chain(&options, 100.0, &GreekKind::ALL, true)
            .await
            .unwrap();
        assert_eq!(engine.metrics().vectorized_calls, 1);
        engine.reset_metrics();
        assert_eq!(engine.metrics().vectorized_calls, 0);
    }
}

//! Premium/discount analysis over option chains
//!
//! Compares market prices with theoretical prices from the configured model,
//! classifies mispricing severity, and runs chain-level arbitrage detectors:
//! severity-based mispricing, put-call parity deviations and vertical price
//! inversions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ModelConfig;
use crate::errors::{Result, SignalError};
use crate::greeks::{ChainPerf, ComputeMethod, ComputePool, GreeksEngine, GreeksResult, OptionRequest};
use crate::models::GreekKind;
use crate::types::OptionType;

/// Deviation in price units beyond which a call/put pair breaks parity.
const PARITY_THRESHOLD: f64 = 1.0;
/// Price-unit magnitude beyond which a vertical inversion is a signal.
const INVERSION_THRESHOLD: f64 = 0.5;

/// Classification levels for mispricing severity, banded on the absolute
/// premium percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MispricingSeverity {
    Low,
    Medium,
    High,
    Extreme,
}

impl MispricingSeverity {
    /// Band on `|premium_pct|`: [0,3) LOW, [3,8) MEDIUM, [8,15) HIGH,
    /// [15,inf) EXTREME.
    pub fn classify(premium_pct_abs: f64) -> Self {
        match premium_pct_abs {
            p if p < 3.0 => Self::Low,
            p if p < 8.0 => Self::Medium,
            p if p < 15.0 => Self::High,
            _ => Self::Extreme,
        }
    }

    pub fn is_arbitrage_signal(&self) -> bool {
        matches!(self, Self::High | Self::Extreme)
    }
}

/// Per-option premium analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiumResult {
    pub option: OptionRequest,
    pub market_price: f64,
    pub theoretical_price: f64,
    pub premium_amount: f64,
    pub premium_pct: f64,
    pub overpriced: bool,
    pub severity: MispricingSeverity,
    pub arbitrage_signal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeks: Option<GreeksResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResult {
    pub results: Vec<PremiumResult>,
    pub perf: ChainPerf,
    pub method: ComputeMethod,
}

impl AnalyzeResult {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            perf: ChainPerf::default(),
            method: ComputeMethod::None,
        }
    }
}

/// Put-call parity deviation for one strike/expiry pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParitySignal {
    pub strike: f64,
    pub expiry: String,
    pub call_price: f64,
    pub put_price: f64,
    pub deviation: f64,
}

/// Vertical price inversion between adjacent strikes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InversionSignal {
    pub option_type: OptionType,
    pub expiry: String,
    pub lower_strike: f64,
    pub higher_strike: f64,
    pub lower_price: f64,
    pub higher_price: f64,
    pub magnitude: f64,
}

/// Summary statistics for one expiry group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpirySummary {
    pub options: usize,
    pub mean_abs_premium_pct: f64,
    pub arbitrage_signals: usize,
}

/// Chain-wide analysis: per-expiry results plus detector output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainAnalyze {
    pub per_expiry: BTreeMap<String, AnalyzeResult>,
    pub summaries: BTreeMap<String, ExpirySummary>,
    pub mispricing: Vec<PremiumResult>,
    pub parity: Vec<ParitySignal>,
    pub inversions: Vec<InversionSignal>,
    pub total_signals: usize,
}

/// Analyzer performance counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyzerMetrics {
    pub analyses: u64,
    pub options_analyzed: u64,
    pub avg_analysis_time_ms: f64,
    pub arbitrage_signals_found: u64,
}

pub struct PremiumAnalyzer {
    engine: Arc<GreeksEngine>,
    model: Arc<ModelConfig>,
    pool: Arc<ComputePool>,
    metrics: Mutex<AnalyzerMetrics>,
}

impl PremiumAnalyzer {
    pub fn new(engine: Arc<GreeksEngine>, model: Arc<ModelConfig>, pool: Arc<ComputePool>) -> Self {
        Self {
            engine,
            model,
            pool,
            metrics: Mutex::new(AnalyzerMetrics::default()),
        }
    }

    /// Premium/discount analysis for a batch of options against one
    /// underlying price. Lengths of `market_prices` and `options` must
    /// match; empty input yields an empty result.
    pub async fn analyze(
        &self,
        market_prices: &[f64],
        options: &[OptionRequest],
        underlying_price: f64,
        include_greeks: bool,
    ) -> Result<AnalyzeResult> {
        if market_prices.len() != options.len() {
            return Err(SignalError::validation(
                "Market prices and option data lengths must match",
            ));
        }
        if options.is_empty() {
            return Ok(AnalyzeResult::empty());
        }

        let start = Instant::now();

        let greeks_chain = if include_greeks {
            Some(
                self.engine
                    .price_chain(options, underlying_price, &GreekKind::ALL, true)
                    .await?,
            )
        } else {
            None
        };

        let theoretical = self.theoretical_prices(options, underlying_price).await?;

        let mut results = Vec::with_capacity(options.len());
        let mut signals = 0u64;
        for (i, option) in options.iter().enumerate() {
            let market_price = market_prices[i];
            let theoretical_price = theoretical[i];
            let premium_amount = market_price - theoretical_price;
            let premium_pct = if theoretical_price > 0.0 {
                premium_amount / theoretical_price * 100.0
            } else {
                0.0
            };
            let severity = MispricingSeverity::classify(premium_pct.abs());
            let arbitrage_signal = severity.is_arbitrage_signal();
            if arbitrage_signal {
                signals += 1;
            }
            results.push(PremiumResult {
                option: option.clone(),
                market_price,
                theoretical_price,
                premium_amount,
                premium_pct,
                overpriced: premium_amount > 0.0,
                severity,
                arbitrage_signal,
                greeks: greeks_chain
                    .as_ref()
                    .and_then(|chain| chain.results.get(i).cloned()),
            });
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.record(options.len(), elapsed_ms, signals);
        info!(
            options = options.len(),
            elapsed_ms, "Premium analysis completed"
        );

        Ok(AnalyzeResult {
            results,
            perf: ChainPerf {
                elapsed_ms,
                options_processed: options.len(),
                options_per_sec: if elapsed_ms > 0.0 {
                    options.len() as f64 / (elapsed_ms / 1000.0)
                } else {
                    0.0
                },
            },
            method: greeks_chain
                .map(|chain| chain.method)
                .unwrap_or(ComputeMethod::Vectorized),
        })
    }

    /// Chain-wide mispricing analysis: per-expiry premium results plus the
    /// parity and vertical-inversion detectors.
    pub async fn analyze_chain(
        &self,
        options_with_market: &[(OptionRequest, f64)],
    ) -> Result<ChainAnalyze> {
        let mut per_expiry_input: BTreeMap<String, Vec<(OptionRequest, f64)>> = BTreeMap::new();
        for (option, market_price) in options_with_market {
            per_expiry_input
                .entry(expiry_tag(option))
                .or_default()
                .push((option.clone(), *market_price));
        }

        let mut per_expiry = BTreeMap::new();
        let mut summaries = BTreeMap::new();
        let mut mispricing = Vec::new();

        for (expiry, group) in &per_expiry_input {
            let underlying_price = group
                .iter()
                .find_map(|(o, _)| o.underlying_price)
                .ok_or_else(|| {
                    SignalError::validation(
                        "Chain analysis requires underlying_price on at least one option per expiry",
                    )
                })?;
            let options: Vec<OptionRequest> = group.iter().map(|(o, _)| o.clone()).collect();
            let prices: Vec<f64> = group.iter().map(|(_, p)| *p).collect();

            let analysis = self.analyze(&prices, &options, underlying_price, true).await?;
            mispricing.extend(
                analysis
                    .results
                    .iter()
                    .filter(|r| r.arbitrage_signal)
                    .cloned(),
            );
            summaries.insert(expiry.clone(), summarise_expiry(&analysis));
            per_expiry.insert(expiry.clone(), analysis);
        }

        let parity = detect_put_call_parity(options_with_market);
        let inversions = detect_vertical_inversions(options_with_market);
        let total_signals = mispricing.len() + parity.len() + inversions.len();
        info!(
            expiries = per_expiry.len(),
            total_signals, "Chain mispricing analysis completed"
        );

        Ok(ChainAnalyze {
            per_expiry,
            summaries,
            mispricing,
            parity,
            inversions,
            total_signals,
        })
    }

    pub fn metrics(&self) -> AnalyzerMetrics {
        self.metrics.lock().clone()
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock() = AnalyzerMetrics::default();
    }

    async fn theoretical_prices(
        &self,
        options: &[OptionRequest],
        underlying_price: f64,
    ) -> Result<Vec<f64>> {
        let model = Arc::clone(&self.model);
        let now = chrono::Utc::now();
        let inputs: Vec<(f64, f64, OptionType, f64)> = options
            .iter()
            .map(|o| {
                (
                    o.strike,
                    crate::timeutil::time_to_expiry_years(o.expiry, now),
                    o.option_type,
                    o.volatility.unwrap_or(model.params().default_volatility),
                )
            })
            .collect();

        self.pool
            .run(move || {
                inputs
                    .iter()
                    .map(|(strike, t, option_type, sigma)| {
                        model.theoretical_price(*option_type, underlying_price, *strike, *t, *sigma)
                    })
                    .collect()
            })
            .await
    }

    fn record(&self, options: usize, elapsed_ms: f64, signals: u64) {
        let mut metrics = self.metrics.lock();
        metrics.analyses += 1;
        metrics.options_analyzed += options as u64;
        metrics.arbitrage_signals_found += signals;
        let analyses = metrics.analyses as f64;
        metrics.avg_analysis_time_ms =
            (metrics.avg_analysis_time_ms * (analyses - 1.0) + elapsed_ms) / analyses;
    }
}

fn expiry_tag(option: &OptionRequest) -> String {
    option.expiry.format("%Y-%m-%d").to_string()
}

fn summarise_expiry(analysis: &AnalyzeResult) -> ExpirySummary {
    let count = analysis.results.len();
    let mean_abs_premium_pct = if count > 0 {
        analysis
            .results
            .iter()
            .map(|r| r.premium_pct.abs())
            .sum::<f64>()
            / count as f64
    } else {
        0.0
    };
    ExpirySummary {
        options: count,
        mean_abs_premium_pct,
        arbitrage_signals: analysis.results.iter().filter(|r| r.arbitrage_signal).count(),
    }
}

/// Same-strike, same-expiry call/put pairs whose price difference exceeds
/// the parity threshold.
fn detect_put_call_parity(options: &[(OptionRequest, f64)]) -> Vec<ParitySignal> {
    let mut pairs: FxHashMap<(u64, String), (Option<f64>, Option<f64>)> = FxHashMap::default();
    for (option, price) in options {
        let key = (option.strike.to_bits(), expiry_tag(option));
        let entry = pairs.entry(key).or_default();
        match option.option_type {
            OptionType::Call => entry.0 = Some(*price),
            OptionType::Put => entry.1 = Some(*price),
        }
    }

    let mut signals: Vec<ParitySignal> = pairs
        .into_iter()
        .filter_map(|((strike_bits, expiry), (call, put))| {
            let (call_price, put_price) = (call?, put?);
            let deviation = call_price - put_price;
            (deviation.abs() > PARITY_THRESHOLD).then(|| ParitySignal {
                strike: f64::from_bits(strike_bits),
                expiry,
                call_price,
                put_price,
                deviation,
            })
        })
        .collect();
    signals.sort_by(|a, b| a.expiry.cmp(&b.expiry).then(a.strike.total_cmp(&b.strike)));
    signals
}

/// Adjacent-strike price inversions, per expiry and side: calls should get
/// cheaper with strike, puts more expensive.
fn detect_vertical_inversions(options: &[(OptionRequest, f64)]) -> Vec<InversionSignal> {
    let mut sides: BTreeMap<(String, char), Vec<(f64, f64)>> = BTreeMap::new();
    for (option, price) in options {
        sides
            .entry((expiry_tag(option), option.option_type.flag()))
            .or_default()
            .push((option.strike, *price));
    }

    let mut signals = Vec::new();
    for ((expiry, flag), mut members) in sides {
        members.sort_by(|a, b| a.0.total_cmp(&b.0));
        let option_type = if flag == 'c' {
            OptionType::Call
        } else {
            OptionType::Put
        };
        for pair in members.windows(2) {
            let (lower_strike, lower_price) = pair[0];
            let (higher_strike, higher_price) = pair[1];
            let inverted = match option_type {
                OptionType::Call => lower_price < higher_price,
                OptionType::Put => lower_price > higher_price,
            };
            let magnitude = (lower_price - higher_price).abs();
            if inverted && magnitude > INVERSION_THRESHOLD {
                signals.push(InversionSignal {
                    option_type,
                    expiry: expiry.clone(),
                    lower_strike,
                    higher_strike,
                    lower_price,
                    higher_price,
                    magnitude,
                });
            }
        }
    }
    signals
}

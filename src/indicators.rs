//! Technical indicators over OHLCV series
//!
//! Each indicator is a small struct behind the [`TechnicalIndicator`]
//! boundary, so alternative numerical backends can plug in without touching
//! callers. Outputs are aligned with the input bars; positions without
//! enough history are `None`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::{Result, SignalError};
use crate::historical::HistoricalDataFacade;
use crate::timeframe::{SeriesPoint, Timeframe};
use crate::types::{Bar, InstrumentKey};

/// Boundary for pluggable indicator implementations.
pub trait TechnicalIndicator: Send + Sync {
    fn name(&self) -> &'static str;
    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>>;
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

fn sma_at(values: &[f64], end: usize, period: usize) -> f64 {
    values[end + 1 - period..=end].iter().sum::<f64>() / period as f64
}

fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if values.len() < period || period == 0 {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = sma_at(values, period - 1, period);
    out[period - 1] = Some(ema);
    for i in period..values.len() {
        ema = ema + k * (values[i] - ema);
        out[i] = Some(ema);
    }
    out
}

/// Simple moving average of closes.
pub struct Sma {
    pub period: usize,
}

impl TechnicalIndicator for Sma {
    fn name(&self) -> &'static str {
        "sma"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let closes = closes(bars);
        let mut out = vec![None; closes.len()];
        if self.period == 0 {
            return out;
        }
        for i in self.period.saturating_sub(1)..closes.len() {
            out[i] = Some(sma_at(&closes, i, self.period));
        }
        out
    }
}

/// Exponential moving average of closes, seeded with the first SMA.
pub struct Ema {
    pub period: usize,
}

impl TechnicalIndicator for Ema {
    fn name(&self) -> &'static str {
        "ema"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        ema_series(&closes(bars), self.period)
    }
}

/// Relative strength index with Wilder smoothing.
pub struct Rsi {
    pub period: usize,
}

impl TechnicalIndicator for Rsi {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let closes = closes(bars);
        let period = self.period;
        let mut out = vec![None; closes.len()];
        if period == 0 || closes.len() <= period {
            return out;
        }

        let mut gains = 0.0;
        let mut losses = 0.0;
        for i in 1..=period {
            let change = closes[i] - closes[i - 1];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        let mut avg_gain = gains / period as f64;
        let mut avg_loss = losses / period as f64;
        out[period] = Some(rsi_value(avg_gain, avg_loss));

        for i in period + 1..closes.len() {
            let change = closes[i] - closes[i - 1];
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
            avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
            out[i] = Some(rsi_value(avg_gain, avg_loss));
        }
        out
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// MACD line: fast EMA minus slow EMA.
pub struct Macd {
    pub fast: usize,
    pub slow: usize,
}

impl TechnicalIndicator for Macd {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let closes = closes(bars);
        let fast = ema_series(&closes, self.fast);
        let slow = ema_series(&closes, self.slow);
        fast.iter()
            .zip(slow.iter())
            .map(|(f, s)| match (f, s) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            })
            .collect()
    }
}

/// Bollinger %B: position of the close within the bands.
pub struct PercentB {
    pub period: usize,
    pub width: f64,
}

impl TechnicalIndicator for PercentB {
    fn name(&self) -> &'static str {
        "percent_b"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let closes = closes(bars);
        let mut out = vec![None; closes.len()];
        if self.period == 0 {
            return out;
        }
        for i in self.period.saturating_sub(1)..closes.len() {
            let window = &closes[i + 1 - self.period..=i];
            let mean = window.iter().sum::<f64>() / self.period as f64;
            let variance =
                window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / self.period as f64;
            let stddev = variance.sqrt();
            let band = self.width * stddev;
            if band > 0.0 {
                out[i] = Some((closes[i] - (mean - band)) / (2.0 * band));
            } else {
                out[i] = Some(0.5);
            }
        }
        out
    }
}

/// Average true range with Wilder smoothing.
pub struct Atr {
    pub period: usize,
}

impl TechnicalIndicator for Atr {
    fn name(&self) -> &'static str {
        "atr"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let mut out = vec![None; bars.len()];
        let period = self.period;
        if period == 0 || bars.len() <= period {
            return out;
        }

        let true_range = |i: usize| {
            let bar = &bars[i];
            let prev_close = bars[i - 1].close;
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };

        let mut atr = (1..=period).map(true_range).sum::<f64>() / period as f64;
        out[period] = Some(atr);
        for i in period + 1..bars.len() {
            atr = (atr * (period as f64 - 1.0) + true_range(i)) / period as f64;
            out[i] = Some(atr);
        }
        out
    }
}

/// Williams %R over a rolling high/low window.
pub struct WilliamsR {
    pub period: usize,
}

impl TechnicalIndicator for WilliamsR {
    fn name(&self) -> &'static str {
        "williams_r"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        range_oscillator(bars, self.period, |close, low, high| {
            if high > low {
                (high - close) / (high - low) * -100.0
            } else {
                0.0
            }
        })
    }
}

/// Stochastic %K over a rolling high/low window.
pub struct StochasticK {
    pub period: usize,
}

impl TechnicalIndicator for StochasticK {
    fn name(&self) -> &'static str {
        "stoch_k"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        range_oscillator(bars, self.period, |close, low, high| {
            if high > low {
                (close - low) / (high - low) * 100.0
            } else {
                50.0
            }
        })
    }
}

fn range_oscillator(
    bars: &[Bar],
    period: usize,
    f: impl Fn(f64, f64, f64) -> f64,
) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 {
        return out;
    }
    for i in period.saturating_sub(1)..bars.len() {
        let window = &bars[i + 1 - period..=i];
        let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        out[i] = Some(f(bars[i].close, low, high));
    }
    out
}

/// Price change over the lookback period.
pub struct Momentum {
    pub period: usize,
}

impl TechnicalIndicator for Momentum {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let closes = closes(bars);
        let mut out = vec![None; closes.len()];
        for i in self.period..closes.len() {
            out[i] = Some(closes[i] - closes[i - self.period]);
        }
        out
    }
}

/// Rolling z-score of the close.
pub struct ZScore {
    pub period: usize,
}

impl TechnicalIndicator for ZScore {
    fn name(&self) -> &'static str {
        "z_score"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let closes = closes(bars);
        let mut out = vec![None; closes.len()];
        if self.period == 0 {
            return out;
        }
        for i in self.period.saturating_sub(1)..closes.len() {
            let window = &closes[i + 1 - self.period..=i];
            let mean = window.iter().sum::<f64>() / self.period as f64;
            let variance =
                window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / self.period as f64;
            let stddev = variance.sqrt();
            out[i] = Some(if stddev == 0.0 {
                0.0
            } else {
                (closes[i] - mean) / stddev
            });
        }
        out
    }
}

/// Volume-weighted average price anchored at a specific time. Bars before
/// the anchor carry no value.
pub struct AnchoredVwap {
    pub anchor: DateTime<Utc>,
}

impl TechnicalIndicator for AnchoredVwap {
    fn name(&self) -> &'static str {
        "anchored_vwap"
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let mut out = vec![None; bars.len()];
        let mut cum_volume = 0.0;
        let mut cum_vp = 0.0;
        for (i, bar) in bars.iter().enumerate() {
            if bar.timestamp < self.anchor {
                continue;
            }
            let typical = (bar.high + bar.low + bar.close) / 3.0;
            cum_volume += bar.volume;
            cum_vp += typical * bar.volume;
            if cum_volume > 0.0 {
                out[i] = Some(cum_vp / cum_volume);
            }
        }
        out
    }
}

/// Build an indicator from a tag like `"rsi"` or `"rsi_21"`. The optional
/// suffix overrides the default period.
pub fn indicator_from_tag(tag: &str) -> Result<Box<dyn TechnicalIndicator>> {
    let (name, period) = match tag.rsplit_once('_') {
        Some((name, digits)) if digits.chars().all(|c| c.is_ascii_digit()) => {
            let period: usize = digits
                .parse()
                .map_err(|_| SignalError::validation(format!("Invalid indicator period: {tag}")))?;
            if period == 0 {
                return Err(SignalError::validation(format!(
                    "Indicator period must be positive: {tag}"
                )));
            }
            (name, Some(period))
        }
        _ => (tag, None),
    };

    let indicator: Box<dyn TechnicalIndicator> = match name {
        "sma" => Box::new(Sma {
            period: period.unwrap_or(20),
        }),
        "ema" => Box::new(Ema {
            period: period.unwrap_or(20),
        }),
        "rsi" => Box::new(Rsi {
            period: period.unwrap_or(14),
        }),
        "macd" => Box::new(Macd { fast: 12, slow: 26 }),
        "percent_b" => Box::new(PercentB {
            period: period.unwrap_or(20),
            width: 2.0,
        }),
        "atr" => Box::new(Atr {
            period: period.unwrap_or(14),
        }),
        "williams_r" => Box::new(WilliamsR {
            period: period.unwrap_or(14),
        }),
        "stoch_k" => Box::new(StochasticK {
            period: period.unwrap_or(14),
        }),
        "momentum" => Box::new(Momentum {
            period: period.unwrap_or(10),
        }),
        "z_score" => Box::new(ZScore {
            period: period.unwrap_or(20),
        }),
        other => {
            return Err(SignalError::validation(format!(
                "Unknown indicator: {other}"
            )))
        }
    };
    Ok(indicator)
}

/// Computes indicator series from historical bars fetched through the
/// facade.
pub struct IndicatorCalculator {
    facade: Arc<HistoricalDataFacade>,
}

impl IndicatorCalculator {
    pub fn new(facade: Arc<HistoricalDataFacade>) -> Self {
        Self { facade }
    }

    /// Indicator series over the bars of `[start, end)` at the given
    /// timeframe. Positions without enough history are omitted.
    pub async fn series(
        &self,
        instrument: &InstrumentKey,
        indicator: &dyn TechnicalIndicator,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>> {
        let bars = self
            .facade
            .timeframe_series(instrument, timeframe, start, end)
            .await?;
        let values = indicator.compute(&bars);

        Ok(bars
            .iter()
            .zip(values)
            .filter_map(|(bar, value)| {
                value.map(|v| SeriesPoint::new(bar.timestamp).with_field(indicator.name(), v))
            })
            .collect())
    }
}
